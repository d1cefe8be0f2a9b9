//! Integration tests for loading datasets and querying a session.
//!
//! Documents are written to temporary files and loaded through the same
//! path the CLI uses.

use attnscope_core::config::AttnConfig;
use attnscope_core::dataset::{DataKind, Music};
use attnscope_core::dual::AttentionSource;
use attnscope_core::error::AttnError;
use attnscope_core::loader::{LoadSource, load_dataset};
use attnscope_core::selection::HeadSelector;
use attnscope_core::sequence::NoteSequence;
use attnscope_core::session::{LoadOutcome, LoadStatus, Session};
use attnscope_core::timeline::TimeMapper;
use pretty_assertions::assert_eq;
use serde_json::{Value, json};
use std::path::{Path, PathBuf};

/// Lower-triangular rows where step `t` attends most to step `t - 1`.
fn causal_rows(len: usize) -> Vec<Vec<f32>> {
    (0..len)
        .map(|t| {
            (0..len)
                .map(|s| match s {
                    _ if s > t => 0.0,
                    _ if s + 1 == t => 1.0,
                    _ if s == t => 0.6,
                    _ => 0.1,
                })
                .collect()
        })
        .collect()
}

fn write_doc(dir: &Path, name: &str, doc: &Value) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, serde_json::to_string(doc).unwrap()).unwrap();
    path
}

fn chorale_doc(layers: usize) -> Value {
    let layer = json!([[causal_rows(8), causal_rows(8)]]);
    json!({
        "music": [60, 64, 67, 72, 62, 65, 69, 74],
        "attention_weights": vec![layer; layers],
    })
}

fn dual_doc() -> Value {
    let local = json!([[causal_rows(4)]]);
    let global = json!([[causal_rows(4)]]);
    json!({
        "music": [60, 64, 67, 72, 0],
        "attention_weights": vec![local; 3],
        "attention_weights_regular": vec![global; 4],
    })
}

fn performance_doc() -> Value {
    json!({
        "music_text": [
            "TIME_SHIFT_20", "VELOCITY_16", "NOTE_ON_60", "TIME_SHIFT_8",
            "NOTE_ON_64", "NOTE_OFF_60", "TIME_SHIFT_4", "NOTE_OFF_64"
        ],
        "attention_weights": [[[causal_rows(8)]]],
    })
}

#[tokio::test]
async fn test_chorale_session_end_to_end() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_doc(dir.path(), "chorale.json", &chorale_doc(2));

    let mut session = Session::new(AttnConfig::default());
    assert!(session.load(&LoadSource::Path(path), None).await.is_applied());

    let dataset = session.dataset().unwrap();
    assert_eq!(dataset.kind, DataKind::Chorale);
    assert_eq!((dataset.min_pitch, dataset.max_pitch), (60, 74));
    assert_eq!(dataset.total_steps, 2);
    assert_eq!(session.state().unwrap().layer, 1);

    session.set_step(5).unwrap();
    let picked = session.select().unwrap();
    let steps: Vec<usize> = picked.iter().map(|p| p.step).collect();
    // Both heads pick the previous step and the step itself.
    assert_eq!(steps, vec![4, 5, 4, 5]);
    assert_eq!(session.select().unwrap(), picked);
}

#[tokio::test]
async fn test_dual_session_orders_global_before_local() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_doc(dir.path(), "duo.json", &dual_doc());

    let mut session = Session::new(AttnConfig::default());
    assert!(session.load(&LoadSource::Path(path), None).await.is_applied());

    let dataset = session.dataset().unwrap();
    assert_eq!(dataset.kind, DataKind::DualChorale);
    assert_eq!(dataset.num_layers(), 4);
    assert_eq!(
        dataset.music,
        Music::Chorale {
            pitches: vec![60, 64, 67, 72]
        }
    );

    session.set_layer(3).unwrap();
    session.set_step(2).unwrap();
    let sources: Vec<AttentionSource> = session.select().unwrap().iter().map(|p| p.source).collect();
    assert_eq!(
        sources,
        vec![
            AttentionSource::Global,
            AttentionSource::Global,
            AttentionSource::Local,
            AttentionSource::Local
        ]
    );
}

#[tokio::test]
async fn test_performance_session_selects_only_note_events() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_doc(dir.path(), "perf.json", &performance_doc());

    let mut session = Session::new(AttnConfig::default());
    assert!(session.load(&LoadSource::Path(path), None).await.is_applied());

    let dataset = session.dataset().unwrap();
    assert_eq!(dataset.kind, DataKind::Performance);
    assert_eq!((dataset.min_pitch, dataset.max_pitch), (60, 64));
    assert_eq!(dataset.total_steps, 32);

    let events = dataset.timeline().as_events().unwrap();
    assert_eq!(events.spans().len(), 2);
    // The leading shift is shortened to the default lead-in.
    assert_eq!(events.spans()[0].start_time, 10.0);
    assert_eq!(events.spans()[0].velocity_bin, Some(16));

    // Step 3 is a time shift and draws nothing.
    session.set_step(3).unwrap();
    assert!(session.select().unwrap().is_empty());

    session.set_step(4).unwrap();
    let picked = session.select().unwrap();
    assert!(picked.iter().all(|p| dataset_anchor(&session, p.step)));
    assert_eq!(picked.iter().map(|p| p.step).collect::<Vec<_>>(), vec![4]);
}

fn dataset_anchor(session: &Session, step: usize) -> bool {
    session.dataset().is_some_and(|d| d.is_anchor(step))
}

#[tokio::test]
async fn test_forced_kind_and_bad_document() {
    let dir = tempfile::tempdir().unwrap();
    let chorale = write_doc(dir.path(), "chorale.json", &chorale_doc(1));
    let broken = write_doc(dir.path(), "broken.json", &json!({"music": [60]}));

    let mut session = Session::new(AttnConfig::default());
    let source = LoadSource::Path(chorale.clone());
    assert!(session.load(&source, Some(DataKind::Chorale)).await.is_applied());

    let outcome = session.load(&LoadSource::Path(broken), None).await;
    assert!(matches!(outcome, LoadOutcome::Failed(AttnError::MalformedInput(_))));
    assert!(matches!(session.status(), LoadStatus::Failed(_)));
    assert_eq!(session.dataset().unwrap().sequence_length(), 8);

    let err = load_dataset(&source, Some(DataKind::Performance), &AttnConfig::default())
        .await
        .unwrap_err();
    assert!(err.is_input_error());
}

#[tokio::test]
async fn test_concurrent_loads_keep_latest() {
    let dir = tempfile::tempdir().unwrap();
    let small = LoadSource::Path(write_doc(dir.path(), "small.json", &chorale_doc(1)));
    let large = LoadSource::Path(write_doc(dir.path(), "large.json", &chorale_doc(3)));
    let config = AttnConfig::default();

    let mut session = Session::new(config.clone());
    let first = session.begin_load();
    let second = session.begin_load();

    let (a, b) = tokio::join!(
        load_dataset(&large, None, &config),
        load_dataset(&small, None, &config)
    );
    // The older request finishes last but must not win.
    assert!(session.complete_load(second, b).is_applied());
    assert!(matches!(session.complete_load(first, a), LoadOutcome::Stale));
    assert_eq!(session.dataset().unwrap().num_layers(), 1);
    assert_eq!(session.status(), &LoadStatus::Ready);
}

#[tokio::test]
async fn test_single_head_playback_and_export() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_doc(dir.path(), "chorale.json", &chorale_doc(1));

    let mut session = Session::new(AttnConfig::default());
    session.load(&LoadSource::Path(path), None).await;
    session.set_head(HeadSelector::Single(0)).unwrap();
    session.begin_playback().unwrap();

    let mut ticks = 0;
    while let Some((step, picked)) = session.tick().unwrap() {
        assert!(picked.iter().all(|p| p.head == 0 && p.step <= step));
        ticks += 1;
    }
    assert_eq!(ticks, 8);

    let dataset = session.dataset().unwrap();
    let seq = NoteSequence::from_dataset(dataset, 32);
    assert_eq!(seq.notes.len(), 8);
    assert_eq!(seq.total_quantized_steps, 2);
    assert_eq!(dataset.timeline().total_time(), 40.0);
}

#[test]
fn test_blocking_load_with_tokio_test() {
    let dir = tempfile::tempdir().unwrap();
    let source = LoadSource::Path(write_doc(dir.path(), "perf.json", &performance_doc()));
    let dataset =
        tokio_test::block_on(load_dataset(&source, None, &AttnConfig::default())).unwrap();
    let seq = NoteSequence::from_dataset(&dataset, 32);
    assert_eq!(seq.time_offset_steps, 10);
    assert_eq!(seq.notes[0].quantized_start_step, 0);
    assert_eq!(seq.notes[0].quantized_end_step, 8);
    assert_eq!(seq.notes[1].quantized_end_step, 12);
}
