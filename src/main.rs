use anyhow::Result;
use clap::{CommandFactory, Parser};
use crossbeam_channel::{bounded, select};
use owo_colors::OwoColorize;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};
use voxprep::audio::processing;
use voxprep::audio::wav::WavAudioSource;
use voxprep::cli::{Cli, Commands, ConfigAction};
use voxprep::config::VoiceConfig;
use voxprep::defaults;
use voxprep::events::{Component, VoiceEvent};
use voxprep::orchestrator::{self, TranscriptionOutcome, VoiceOrchestrator};
use voxprep::probe::{Capabilities, CapabilityRating, PermissionState};
use voxprep::stt::{Transcriber, WhisperConfig, WhisperTranscriber};

fn main() -> Result<()> {
    let Cli {
        command,
        config,
        quiet,
        verbose,
        language,
        device,
        model,
    } = Cli::parse();

    let load = || {
        load_config(
            config.as_deref(),
            language.as_deref(),
            device.as_deref(),
            model.as_deref(),
        )
    };

    match command {
        None => run_record(load()?, None, quiet, verbose),
        Some(Commands::Record { seconds }) => run_record(load()?, seconds, quiet, verbose),
        Some(Commands::Transcribe { file }) => run_transcribe(&load()?, &file, quiet, verbose),
        Some(Commands::Speak { text, test, voice }) => {
            let mut config = load()?;
            if let Some(voice) = voice {
                config.tts.voice = Some(voice);
            }
            run_speak(config, text.as_deref(), test, quiet)
        }
        Some(Commands::Devices) => list_audio_devices(),
        Some(Commands::Doctor) => run_doctor(&load()?, verbose),
        Some(Commands::Config { action }) => handle_config_command(action, config.as_deref()),
        Some(Commands::Completions { shell }) => {
            clap_complete::generate(shell, &mut Cli::command(), "voxprep", &mut std::io::stdout());
            Ok(())
        }
    }
}

/// Load configuration and apply overrides.
///
/// Priority order (lowest to highest):
/// 1. Built-in defaults
/// 2. Config file (--config path, else ~/.config/voxprep/config.toml)
/// 3. VOXPREP_* environment variables
/// 4. Command-line flags
fn load_config(
    custom_path: Option<&Path>,
    language: Option<&str>,
    device: Option<&str>,
    model: Option<&str>,
) -> Result<VoiceConfig> {
    let config = if let Some(path) = custom_path {
        VoiceConfig::load(path)?
    } else {
        let default_path = VoiceConfig::default_path();
        VoiceConfig::load_or_default(&default_path)
    };
    let mut config = config.with_env_overrides();

    if let Some(language) = language {
        config.service.language = language.to_string();
    }
    if let Some(device) = device {
        config.audio.device = Some(device.to_string());
    }
    if let Some(model) = model {
        config.stt.model = model.to_string();
    }
    Ok(config)
}

/// Record from the microphone and print the transcription to stdout.
///
/// Stops after `seconds` when given, otherwise when Enter is pressed. The
/// transcription text is the only thing written to stdout; progress and
/// the live meter go to stderr.
fn run_record(config: VoiceConfig, seconds: Option<u64>, quiet: bool, verbose: u8) -> Result<()> {
    let mut orchestrator = VoiceOrchestrator::new(config);
    orchestrator.initialize()?;

    let events = orchestrator.subscribe();
    orchestrator.start_recording()?;

    if !quiet {
        match seconds {
            Some(secs) => eprintln!("{} Recording for {secs}s...", "●".red()),
            None => eprintln!("{} Recording... press Enter to stop", "●".red()),
        }
    }

    // Stop trigger: a timer, or Enter on stdin
    let (stop_tx, stop_rx) = bounded::<()>(1);
    match seconds {
        Some(secs) => {
            thread::spawn(move || {
                thread::sleep(Duration::from_secs(secs));
                let _ = stop_tx.send(());
            });
        }
        None => {
            thread::spawn(move || {
                let mut line = String::new();
                let _ = std::io::stdin().read_line(&mut line);
                let _ = stop_tx.send(());
            });
        }
    }

    let mut outcome: Option<TranscriptionOutcome> = None;
    let mut failure: Option<String> = None;

    // Render live events until the stop trigger fires or the session dies
    loop {
        select! {
            recv(events) -> msg => {
                let Ok(event) = msg else { break };
                render_live_event(&event, quiet, verbose);
                if let VoiceEvent::Failed { component, message } = event
                    && component != Component::Quality
                {
                    failure = Some(message);
                    break;
                }
            }
            recv(stop_rx) -> _ => break,
        }
    }

    if !quiet && verbose >= 1 {
        clear_line();
    }
    orchestrator.stop_recording()?;

    // The terminal event is already on the bus once stop returns
    while let Ok(event) = events.try_recv() {
        match event {
            VoiceEvent::TranscriptionReady { result } => outcome = Some(result),
            VoiceEvent::Failed { component, message } if component != Component::Quality => {
                failure = Some(message);
            }
            _ => {}
        }
    }

    match (outcome, failure) {
        (Some(result), _) => {
            if !quiet {
                let mut tag = format!("{} {:.0}%", result.method, result.confidence * 100.0);
                if verbose >= 1 {
                    tag.push_str(&format!(", {}ms", result.processing_time_ms));
                    if let Some(m) = &result.audio_metrics {
                        tag.push_str(&format!(
                            ", {:.1}s clip, {:.1} dB SNR",
                            m.duration_secs, m.signal_to_noise_db
                        ));
                    }
                }
                eprintln!("{}", format!("[{tag}]").dimmed());
            }
            println!("{}", result.text);
            Ok(())
        }
        (None, Some(message)) => anyhow::bail!("{message}"),
        (None, None) => anyhow::bail!("recording ended without a result"),
    }
}

/// Transcribe a WAV file (or stdin for "-") with the embedded engine.
fn run_transcribe(config: &VoiceConfig, file: &Path, quiet: bool, verbose: u8) -> Result<()> {
    let source = if file == Path::new("-") {
        WavAudioSource::from_stdin()?
    } else {
        WavAudioSource::from_file(file)?
    };
    let duration = source.duration_secs();
    let samples = source.into_samples();
    if samples.is_empty() {
        anyhow::bail!("no audio samples in {}", file.display());
    }

    if !quiet {
        eprintln!("{}", format!("Transcribing {duration:.1}s of audio...").dimmed());
    }

    let started = Instant::now();
    let clip = if config.service.enable_audio_processing {
        let options = orchestrator::effective_processing(config);
        processing::process_clip(&samples, defaults::SAMPLE_RATE, &options)
    } else {
        samples
    };

    let whisper = WhisperConfig::from_settings(&config.stt, &config.service.language)?;
    let transcriber = WhisperTranscriber::new(whisper)?;
    let result = transcriber.transcribe(&clip)?;

    if !quiet {
        let mut tag = format!("{} {:.0}%", transcriber.model_name(), result.confidence * 100.0);
        if verbose >= 1 {
            tag.push_str(&format!(", {}ms", started.elapsed().as_millis()));
        }
        eprintln!("{}", format!("[{tag}]").dimmed());
    }
    println!("{}", result.text);
    Ok(())
}

/// Speak text, or run the voice test, and wait for playback to finish.
fn run_speak(config: VoiceConfig, text: Option<&str>, test: bool, quiet: bool) -> Result<()> {
    let language = config.service.language.clone();
    let mut orchestrator = VoiceOrchestrator::new(config);
    orchestrator.initialize()?;

    if test {
        if !quiet {
            eprintln!("{}", format!("Testing voice output ({language})...").dimmed());
        }
        if orchestrator.test_voice(None)? {
            println!("{} voice output works", "✓".green());
            Ok(())
        } else {
            anyhow::bail!("voice test did not complete");
        }
    } else {
        let Some(text) = text else {
            anyhow::bail!("provide text to speak, or --test for the built-in phrase");
        };
        let events = orchestrator.subscribe();
        orchestrator.speak(text)?;

        // Hold the process open until the utterance finishes
        loop {
            match events.recv() {
                Ok(VoiceEvent::TtsComplete { outcome }) => {
                    if outcome.success {
                        if !quiet && let Some(ms) = outcome.duration_ms {
                            eprintln!("{}", format!("[{ms}ms]").dimmed());
                        }
                        return Ok(());
                    }
                    let reason = outcome.error.unwrap_or_else(|| "unknown error".to_string());
                    anyhow::bail!("synthesis failed: {reason}");
                }
                Ok(_) => {}
                Err(_) => anyhow::bail!("synthesis ended without reporting completion"),
            }
        }
    }
}

/// List available audio input devices.
fn list_audio_devices() -> Result<()> {
    #[cfg(feature = "cpal-audio")]
    {
        let devices = voxprep::audio::capture::list_devices()?;

        if devices.is_empty() {
            eprintln!("No audio input devices found");
            std::process::exit(1);
        }

        println!("Available audio input devices:");
        for (idx, device) in devices.iter().enumerate() {
            println!("  [{}] {}", idx, device);
        }

        Ok(())
    }
    #[cfg(not(feature = "cpal-audio"))]
    {
        eprintln!("Built without microphone support (cpal-audio feature)");
        std::process::exit(1);
    }
}

/// Probe the host and print the capability report.
fn run_doctor(config: &VoiceConfig, verbose: u8) -> Result<()> {
    println!("Checking voice capabilities...\n");

    let caps = Capabilities::detect(config);

    print!("Native recognition:    ");
    if caps.native_recognition.available {
        println!("{} available", "✓".green());
    } else {
        println!("- not provided by host (embedded engine covers transcription)");
    }

    print!("Speech synthesis:      ");
    if caps.synthesis.available {
        let engine = caps.synthesis.engine.as_deref().unwrap_or("unknown");
        println!(
            "{} {} ({} voices)",
            "✓".green(),
            engine,
            caps.synthesis.voice_count
        );
    } else {
        println!("{} no engine found", "✗".red());
        println!("  Install: sudo apt install espeak-ng   (Debian/Ubuntu)");
        println!("           sudo pacman -S espeak-ng     (Arch)");
    }

    print!("Microphone capture:    ");
    if caps.recording.available {
        println!(
            "{} OK ({})",
            "✓".green(),
            caps.recording.containers.join(", ")
        );
    } else {
        println!("{} no input device", "✗".red());
    }

    print!("Microphone permission: ");
    match caps.microphone_permission {
        PermissionState::Granted => println!("{} granted", "✓".green()),
        PermissionState::Denied => println!("{} denied", "✗".red()),
        other => println!("{} {}", "⚠".yellow(), other),
    }

    print!("Signal processing:     ");
    if caps.dsp.available {
        match caps.dsp.device_sample_rate {
            Some(rate) => println!("{} OK (device at {} Hz)", "✓".green(), rate),
            None => println!("{} OK", "✓".green()),
        }
    } else {
        println!("{} unavailable", "✗".red());
    }

    print!("Embedded engine:       ");
    if !caps.embedded.compiled {
        println!("- not compiled in (whisper feature)");
    } else if caps.embedded.model_available {
        print!("{} model ready, {} threads", "✓".green(), caps.embedded.threads);
        if caps.embedded.simd {
            print!(", SIMD");
        }
        println!();
        if verbose >= 1 && let Some(path) = &caps.embedded.model_path {
            println!("  {}", path.display().to_string().dimmed());
        }
    } else {
        println!("{} compiled, but no model found", "⚠".yellow());
    }

    let report = caps.report();
    println!();
    match report.rating {
        CapabilityRating::Excellent | CapabilityRating::Good => {
            println!("Overall: {} (score {}/100)", report.rating.green(), report.score);
        }
        CapabilityRating::Limited => {
            println!("Overall: {} (score {}/100)", report.rating.yellow(), report.score);
        }
        CapabilityRating::Poor => {
            println!("Overall: {} (score {}/100)", report.rating.red(), report.score);
        }
    }

    for (title, items) in [
        ("Issues", &report.issues),
        ("Recommendations", &report.recommendations),
        ("Fallback strategies", &report.fallback_strategies),
    ] {
        if !items.is_empty() {
            println!();
            println!("{title}:");
            for item in items {
                println!("  - {item}");
            }
        }
    }

    Ok(())
}

/// Handle configuration commands.
fn handle_config_command(action: ConfigAction, custom_path: Option<&Path>) -> Result<()> {
    let config_path = custom_path
        .map(PathBuf::from)
        .unwrap_or_else(VoiceConfig::default_path);

    match action {
        ConfigAction::Show => {
            let config = VoiceConfig::load_or_default(&config_path).with_env_overrides();
            print!("{}", config.to_display_toml()?);
        }
        ConfigAction::Path => {
            println!("{}", config_path.display());
        }
        ConfigAction::Dump => {
            print!("{}", VoiceConfig::default().to_display_toml()?);
        }
    }
    Ok(())
}

/// Clear the current terminal line (replaces the live meter).
fn clear_line() {
    eprint!("\r\x1b[2K");
}

/// Render an event that arrived while recording; stdout stays reserved for
/// the final transcription.
fn render_live_event(event: &VoiceEvent, quiet: bool, verbose: u8) {
    if quiet {
        return;
    }
    match event {
        VoiceEvent::QualityUpdated { status, metrics } if verbose >= 1 => {
            eprint!(
                "\r\x1b[2K{} {:9} {:5.1} dB SNR",
                level_bar(metrics.volume),
                status.to_string(),
                metrics.signal_to_noise_db
            );
            std::io::stderr().flush().ok();
        }
        VoiceEvent::StatusChanged { status } if verbose >= 2 => {
            clear_line();
            eprintln!("{}", format!("status: {status}").dimmed());
        }
        VoiceEvent::Failed { component, message } => {
            clear_line();
            if *component == Component::Quality {
                eprintln!("{} {message}", "⚠".yellow());
            } else {
                eprintln!("{} {message}", "✗".red());
            }
        }
        _ => {}
    }
}

/// 20-slot volume meter. Speech RMS sits well below full scale, so the low
/// range is stretched.
fn level_bar(volume: f32) -> String {
    const SLOTS: usize = 20;
    let filled = ((volume.clamp(0.0, 1.0) * 100.0) as usize).min(SLOTS);
    let mut bar = String::with_capacity(SLOTS + 2);
    bar.push('[');
    for i in 0..SLOTS {
        bar.push(if i < filled { '#' } else { '-' });
    }
    bar.push(']');
    bar
}
