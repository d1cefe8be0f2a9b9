//! CLI subcommand handlers.

use crate::Commands;
use crate::ConfigAction;
use crate::InputArgs;
use attnscope_core::config::{AttnConfig, WORKSPACE_CONFIG_DIR, load_config, write_workspace_config};
use attnscope_core::sequence::NoteSequence;
use attnscope_core::timeline::FixedGridMapper;
use attnscope_core::{Dataset, HeadSelector, LoadOutcome, Music, Session, TimeMapper};
use serde_json::{Value, json};
use std::path::Path;
use std::time::Duration;

/// Handle a CLI subcommand.
pub async fn handle_command(command: Commands, workspace: &Path) -> anyhow::Result<()> {
    match command {
        Commands::Config { action } => handle_config(action, workspace).await,
        Commands::Info { input } => {
            let session = open_session(&input, workspace_config(workspace)?).await?;
            println!("{}", render_info(loaded(&session)?));
            Ok(())
        }
        Commands::Select {
            input,
            layer,
            head,
            step,
            disable_head,
            top,
            top_n,
            cutoff,
            epsilon,
        } => {
            let mut config = workspace_config(workspace)?;
            config.ranking.top_only |= top;
            if let Some(n) = top_n {
                config.ranking.top_n = n;
            }
            if let Some(c) = cutoff {
                config.ranking.cutoff = c;
            }
            if let Some(e) = epsilon {
                config.ranking.epsilon = e;
            }

            let mut session = open_session(&input, config).await?;
            if let Some(layer) = layer {
                session.set_layer(layer)?;
            }
            session.set_head(head)?;
            for h in disable_head {
                session.set_head_enabled(h, false)?;
            }
            session.set_step(step)?;
            let selections = session.select()?;
            println!("{}", serde_json::to_string_pretty(&selections)?);
            Ok(())
        }
        Commands::Heat {
            input,
            layer,
            head,
            step,
        } => {
            let session = open_session(&input, workspace_config(workspace)?).await?;
            let dataset = loaded(&session)?;
            let layer = layer.unwrap_or_else(|| dataset.num_layers().saturating_sub(1));
            let heat = heat_json(dataset, layer, head, step, session.config().ranking.epsilon)?;
            println!("{}", serde_json::to_string_pretty(&heat)?);
            Ok(())
        }
        Commands::Spans { input } => {
            let session = open_session(&input, workspace_config(workspace)?).await?;
            println!("{}", serde_json::to_string_pretty(&spans_json(loaded(&session)?))?);
            Ok(())
        }
        Commands::Export { input, output } => {
            let session = open_session(&input, workspace_config(workspace)?).await?;
            let sequence = NoteSequence::from_dataset(
                loaded(&session)?,
                session.config().performance.velocity_bins,
            );
            let json = sequence.to_json()?;
            match output {
                Some(path) => {
                    tokio::fs::write(&path, json).await?;
                    println!(
                        "Wrote {} notes to {}",
                        sequence.notes.len(),
                        path.display()
                    );
                }
                None => println!("{}", json),
            }
            Ok(())
        }
        Commands::Play {
            input,
            interval_ms,
            layer,
            head,
        } => {
            let config = workspace_config(workspace)?;
            let interval = interval_ms.unwrap_or(config.playback.tick_interval_ms);
            let mut session = open_session(&input, config).await?;
            if let Some(layer) = layer {
                session.set_layer(layer)?;
            }
            session.set_head(head)?;
            let ticks = play(&mut session, Duration::from_millis(interval.max(1))).await?;
            println!("Played {} steps", ticks);
            Ok(())
        }
    }
}

async fn handle_config(action: ConfigAction, workspace: &Path) -> anyhow::Result<()> {
    match action {
        ConfigAction::Init => {
            let config_path = workspace.join(WORKSPACE_CONFIG_DIR).join("config.toml");
            if config_path.exists() {
                println!(
                    "Configuration file already exists at: {}",
                    config_path.display()
                );
                return Ok(());
            }

            let path = write_workspace_config(workspace, &AttnConfig::default())?;
            println!("Created default configuration at: {}", path.display());
            Ok(())
        }
        ConfigAction::Show => {
            let config = workspace_config(workspace)?;
            let toml_str = toml::to_string_pretty(&config)?;
            println!("{}", toml_str);
            Ok(())
        }
    }
}

fn workspace_config(workspace: &Path) -> anyhow::Result<AttnConfig> {
    load_config(Some(workspace), None).map_err(|e| anyhow::anyhow!("Failed to load config: {}", e))
}

async fn open_session(input: &InputArgs, config: AttnConfig) -> anyhow::Result<Session> {
    tracing::debug!(source = %input.source, kind = ?input.kind, "Opening dataset");
    let mut session = Session::new(config);
    match session.load(&input.source, input.kind).await {
        LoadOutcome::Applied => Ok(session),
        LoadOutcome::Failed(e) => Err(anyhow::anyhow!("Failed to load {}: {}", input.source, e)),
        LoadOutcome::Stale => Err(anyhow::anyhow!(
            "Load of {} was superseded",
            input.source
        )),
    }
}

fn loaded(session: &Session) -> anyhow::Result<&Dataset> {
    session
        .dataset()
        .ok_or_else(|| anyhow::anyhow!("No dataset loaded"))
}

fn render_info(dataset: &Dataset) -> String {
    let mut out = String::new();
    out.push_str(&format!("Kind:            {}\n", dataset.kind));
    if let Some(label) = &dataset.info.label {
        out.push_str(&format!("Source:          {}\n", label));
    }
    out.push_str(&format!("Layers:          {}\n", dataset.num_layers()));
    out.push_str(&format!("Heads:           {}\n", dataset.num_heads()));
    out.push_str(&format!("Sequence length: {}\n", dataset.sequence_length()));
    out.push_str(&format!(
        "Pitch range:     {}-{}\n",
        dataset.min_pitch, dataset.max_pitch
    ));
    out.push_str(&format!("Total steps:     {}\n", dataset.total_steps));
    out.push_str(&format!(
        "Loaded at:       {}",
        dataset.info.loaded_at.format("%Y-%m-%d %H:%M:%S UTC")
    ));
    out
}

fn spans_json(dataset: &Dataset) -> Value {
    match (&dataset.music, dataset.timeline().as_events()) {
        (Music::Performance { .. }, Some(events)) => json!({
            "spans": events.spans(),
            "velocity": events.velocity_curve(),
            "total_time": events.total_time(),
        }),
        (Music::Chorale { pitches }, _) => {
            let timeline = dataset.timeline();
            let notes: Vec<Value> = pitches
                .iter()
                .enumerate()
                .filter_map(|(index, pitch)| {
                    let region = timeline.region(index)?;
                    let (step, voice) = FixedGridMapper::index_to_step_voice(index);
                    Some(json!({
                        "index": index,
                        "pitch": pitch,
                        "step": step,
                        "voice": voice,
                        "start": region.start,
                        "end": region.end,
                    }))
                })
                .collect();
            json!({ "notes": notes, "total_time": timeline.total_time() })
        }
        (Music::Performance { .. }, None) => json!({ "spans": [] }),
    }
}

fn heat_json(
    dataset: &Dataset,
    layer: usize,
    head: usize,
    step: usize,
    epsilon: f32,
) -> anyhow::Result<Value> {
    let mut sources = Vec::new();
    for (source, _) in dataset.attention.sources() {
        let heat = dataset.note_heat(source, layer, head, step, epsilon)?;
        sources.push(json!({ "source": source, "heat": heat }));
    }
    Ok(Value::Array(sources))
}

/// Cooperative playback: one step per tick until the end of the sequence.
async fn play(session: &mut Session, interval: Duration) -> anyhow::Result<usize> {
    session.begin_playback()?;
    let mut ticker = tokio::time::interval(interval);
    let mut ticks = 0;
    loop {
        ticker.tick().await;
        let Some((step, selections)) = session.tick()? else {
            break;
        };
        ticks += 1;
        let time = session
            .dataset()
            .and_then(|d| d.timeline().index_to_time(step))
            .unwrap_or_default();
        match selections.iter().max_by(|a, b| a.value.total_cmp(&b.value)) {
            Some(best) => println!(
                "step {:>5}  t={:>8.1}  {:>3} attentions  strongest {} (head {}, {:.3})",
                step,
                time,
                selections.len(),
                best.step,
                best.head,
                best.value
            ),
            None => println!("step {:>5}  t={:>8.1}    0 attentions", step, time),
        }
    }
    Ok(ticks)
}
