//! CLI Command Implementations
//!
//! Implements the actual logic for each CLI command.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::config::EngineConfig;
use crate::engine::{
    decode_source, decode_wav_file, source_ref_for_file, AudioBuffer, AudioOutputDevice,
    ChannelLayout, DecodedAudio, Engine, LoadReport, SoftwareDevice,
};
use crate::error::{LayerdeckError, Result};
use crate::export::encode_wav;
use crate::layers::{format_time, parse_time, AudioSourceRef, LayerSpec};
use crate::state::{write_atomic, FilePersistence, LayerRecord};

/// Directory relative source URIs are resolved against
fn project_dir(project: &Path) -> PathBuf {
    match project.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

/// Re-decode a layer's audio from its source reference
fn resolve_record(record: &LayerRecord, base_dir: &Path) -> Result<DecodedAudio> {
    match &record.audio_source_ref {
        Some(source) => decode_source(source, Some(base_dir)),
        None => Err(LayerdeckError::decode(format!(
            "layer '{}' has no audio source reference",
            record.name
        ))),
    }
}

/// Load a project file into a fresh engine
///
/// Returns `Ok(None)` when the file does not exist.
fn load_engine(
    project: &Path,
    config: &EngineConfig,
) -> Result<Option<(Engine<SoftwareDevice>, LoadReport)>> {
    let base_dir = project_dir(project);
    let mut engine = Engine::new(
        SoftwareDevice::new(config.output_sample_rate),
        config.clone(),
    );
    let mut port = FilePersistence::new(project);
    let report = engine.load_from(&mut port, |record| resolve_record(record, &base_dir))?;

    Ok(report.map(|report| {
        for (id, err) in &report.failed {
            println!("Skipped layer {}: {}", id, err);
        }
        (engine, report)
    }))
}

fn open_project(project: &Path, config: &EngineConfig) -> Result<(Engine<SoftwareDevice>, LoadReport)> {
    load_engine(project, config)?.ok_or_else(|| LayerdeckError::Persistence {
        reason: format!("no project at {}", project.display()),
    })
}

/// Render a project offline to a WAV file.
pub fn render(
    project: &Path,
    output: &Path,
    sample_rate: Option<u32>,
    master_volume: Option<f32>,
    config: &EngineConfig,
) -> Result<()> {
    info!("Rendering project: {}", project.display());

    let mut config = config.clone();
    if sample_rate.is_some() {
        config.export_sample_rate = sample_rate;
    }
    let (mut engine, _) = open_project(project, &config)?;
    if let Some(volume) = master_volume {
        engine.set_master_volume(volume);
    }

    let summary = engine.export_to_file(output)?;

    println!("Rendered: {}", output.display());
    println!(
        "Length: {} ({} frames @ {} Hz)",
        format_time(summary.duration_secs()),
        summary.frames,
        summary.sample_rate
    );
    println!("Peak: {:.3}", summary.peak);

    Ok(())
}

/// Print a project's layers and timeline length.
pub fn inspect(project: &Path, config: &EngineConfig) -> Result<()> {
    let (engine, report) = open_project(project, config)?;

    println!("Project: {}", project.display());
    println!("{:-<72}", "");

    for layer in engine.layers() {
        println!(
            "{} [{}]",
            layer.name,
            layer.category.as_deref().unwrap_or("uncategorised")
        );
        println!("    id:      {}", layer.id);
        println!(
            "    span:    {} - {} ({:.2}s)",
            format_time(layer.start_time),
            format_time(layer.end_time()),
            layer.duration
        );
        println!(
            "    trim:    {:.2}s - {:.2}s of {:.2}s",
            layer.trim_start,
            layer.trim_end,
            layer.source_duration()
        );
        println!(
            "    volume:  {:.2}  fades: {:.2}s in / {:.2}s out",
            layer.volume, layer.fade_in, layer.fade_out
        );
        if layer.looping {
            println!("    loop:    anchored at {:.2}s", layer.effective_anchor());
        }
    }

    println!("{:-<72}", "");
    let mode = if engine.duration_override().is_some() {
        "manual"
    } else {
        "auto"
    };
    println!(
        "Layers: {} loaded, {} skipped",
        report.loaded.len(),
        report.failed.len()
    );
    println!(
        "Timeline: {} ({})",
        format_time(engine.effective_duration()),
        mode
    );
    println!("Master volume: {:.2}", engine.master_volume());

    Ok(())
}

/// Play a project through the software device and write what it produced.
pub fn preview(
    project: &Path,
    output: &Path,
    seconds: Option<f64>,
    from: &str,
    config: &EngineConfig,
) -> Result<()> {
    info!("Previewing project: {}", project.display());

    let (mut engine, _) = open_project(project, config)?;
    engine.init()?;

    let start = parse_time(from)?.unwrap_or(0.0);
    engine.seek(start);
    let position = engine.position();

    let report = engine.play()?;
    for (id, err) in &report.failed {
        warn!(layer_id = %id, error = %err, "layer silent in preview");
    }

    let rate = engine.device().sample_rate();
    let block = (engine.config().poll_interval_ms * u64::from(rate) / 1000).max(1) as usize;
    let span = seconds
        .filter(|s| s.is_finite())
        .unwrap_or_else(|| engine.effective_duration() - position)
        .max(0.0);
    let total_frames = (span * f64::from(rate)).ceil() as usize;

    let mut captured = AudioBuffer::new(0, ChannelLayout::Stereo, rate);
    while captured.len() < total_frames {
        let frames = block.min(total_frames - captured.len());
        let chunk = engine.device_mut().render(frames);
        for (dst, src) in captured.samples.iter_mut().zip(&chunk.samples) {
            dst.extend_from_slice(src);
        }
        engine.tick();
        if engine.transport().is_stopped() {
            break;
        }
    }
    engine.shutdown();

    let bytes = encode_wav(&captured)?;
    write_atomic(output, &bytes).map_err(|e| {
        LayerdeckError::export(format!("cannot write {}: {}", output.display(), e))
    })?;

    println!("Preview written: {}", output.display());
    println!(
        "Captured {} from {} ({} voices scheduled)",
        format_time(captured.duration_secs()),
        format_time(position),
        report.scheduled.len()
    );

    Ok(())
}

/// Add a WAV file as a layer and save the project.
pub fn add(
    project: &Path,
    wav: &Path,
    at: &str,
    loop_for: Option<&str>,
    name: Option<&str>,
    config: &EngineConfig,
) -> Result<()> {
    info!("Adding {} to {}", wav.display(), project.display());

    let start = parse_time(at)?.unwrap_or(0.0);
    let loop_duration = match loop_for {
        Some(input) => parse_time(input)?,
        None => None,
    };

    let mut engine = match load_engine(project, config)? {
        Some((_, report)) if !report.failed.is_empty() => {
            return Err(LayerdeckError::Persistence {
                reason: format!(
                    "{} layer(s) could not be restored; refusing to overwrite {}",
                    report.failed.len(),
                    project.display()
                ),
            });
        }
        Some((engine, _)) => engine,
        None => {
            println!("Creating project: {}", project.display());
            Engine::new(
                SoftwareDevice::new(config.output_sample_rate),
                config.clone(),
            )
        }
    };

    let decoded = decode_wav_file(wav)?;
    let layer_name = name.map(str::to_string).unwrap_or_else(|| {
        wav.file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_else(|| "layer".to_string())
    });

    let mut spec = LayerSpec::from_decoded(layer_name, decoded)?
        .at(start)
        .with_source_ref(source_reference(wav, &project_dir(project))?);
    if let Some(duration) = loop_duration {
        spec = spec.looped(duration);
    }

    let id = engine.add_layer(spec);
    engine.save_project(&mut FilePersistence::new(project))?;

    if let Some(layer) = engine.layer(id) {
        println!(
            "Added layer {} ({}) at {} for {:.2}s",
            layer.name,
            id,
            format_time(layer.start_time),
            layer.duration
        );
    }
    println!("Project saved: {}", project.display());

    Ok(())
}

/// Checksummed reference, relative to the project when the file lives there
fn source_reference(wav: &Path, base_dir: &Path) -> Result<AudioSourceRef> {
    let absolute = fs::canonicalize(wav)?;
    let mut source = source_ref_for_file(&absolute)?;
    if let Ok(base) = fs::canonicalize(base_dir) {
        if let Ok(relative) = absolute.strip_prefix(&base) {
            source.uri = relative.to_string_lossy().into_owned();
        }
    }
    Ok(source)
}

/// Parse a time string and print the result.
pub fn parse_time_command(input: &str) -> Result<()> {
    match parse_time(input)? {
        Some(seconds) => println!("{} seconds ({})", seconds, format_time(seconds)),
        None => println!("empty (clears the duration override)"),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::generate_test_tone;
    use crate::export::WavHeader;
    use crate::state::{PersistencePort, ProjectDocument};
    use tempfile::TempDir;

    fn write_tone(path: &Path, secs: f32) {
        let decoded = generate_test_tone(330.0, secs, 8000);
        let buffer = AudioBuffer::from_decoded(decoded).unwrap();
        fs::write(path, encode_wav(&buffer).unwrap()).unwrap();
    }

    fn config() -> EngineConfig {
        EngineConfig {
            output_sample_rate: 8000,
            ..Default::default()
        }
    }

    fn load_document(path: &Path) -> ProjectDocument {
        let bytes = FilePersistence::new(path).load().unwrap().unwrap();
        ProjectDocument::from_bytes(&bytes).unwrap()
    }

    #[test]
    fn test_add_creates_project_with_relative_uri() {
        let dir = TempDir::new().unwrap();
        let wav = dir.path().join("kick.wav");
        let project = dir.path().join("song.json");
        write_tone(&wav, 1.0);

        add(&project, &wav, "0:02", None, None, &config()).unwrap();

        let document = load_document(&project);
        assert_eq!(document.layers.len(), 1);
        let record = &document.layers[0];
        assert_eq!(record.name, "kick");
        assert_eq!(record.start_time, 2.0);
        let source = record.audio_source_ref.as_ref().unwrap();
        assert_eq!(source.uri, "kick.wav");
        assert!(source.sha256.is_some());
    }

    #[test]
    fn test_add_loop_then_render() {
        let dir = TempDir::new().unwrap();
        let wav = dir.path().join("pad.wav");
        let project = dir.path().join("song.json");
        let output = dir.path().join("mix.wav");
        write_tone(&wav, 1.0);

        add(&project, &wav, "0", Some("12"), Some("pad"), &config()).unwrap();
        render(&project, &output, Some(8000), None, &config()).unwrap();

        let bytes = fs::read(&output).unwrap();
        let header = WavHeader::parse(&bytes).unwrap();
        assert_eq!(header.sample_rate, 8000);
        assert_eq!(header.frame_count(), 12 * 8000);
    }

    #[test]
    fn test_preview_captures_requested_span() {
        let dir = TempDir::new().unwrap();
        let wav = dir.path().join("tone.wav");
        let project = dir.path().join("song.json");
        let output = dir.path().join("preview.wav");
        write_tone(&wav, 2.0);

        add(&project, &wav, "0", None, None, &config()).unwrap();
        preview(&project, &output, Some(1.5), "0", &config()).unwrap();

        let header = WavHeader::parse(&fs::read(&output).unwrap()).unwrap();
        assert_eq!(header.frame_count(), 12_000);
    }

    #[test]
    fn test_add_refuses_to_drop_unrestorable_layers() {
        let dir = TempDir::new().unwrap();
        let wav = dir.path().join("tone.wav");
        let project = dir.path().join("song.json");
        write_tone(&wav, 1.0);

        add(&project, &wav, "0", None, None, &config()).unwrap();
        fs::remove_file(&wav).unwrap();
        let other = dir.path().join("other.wav");
        write_tone(&other, 1.0);

        let err = add(&project, &other, "0", None, None, &config()).unwrap_err();
        assert_eq!(err.error_code(), "PERSISTENCE_FAILURE");
        assert_eq!(load_document(&project).layers.len(), 1);
    }

    #[test]
    fn test_render_missing_project() {
        let dir = TempDir::new().unwrap();
        let err = render(
            &dir.path().join("missing.json"),
            &dir.path().join("out.wav"),
            None,
            None,
            &config(),
        )
        .unwrap_err();
        assert_eq!(err.error_code(), "PERSISTENCE_FAILURE");
    }

    #[test]
    fn test_parse_time_command() {
        assert!(parse_time_command("1:30").is_ok());
        assert!(parse_time_command("").is_ok());
        assert!(parse_time_command("1:75").is_err());
    }
}
