use crate::book::{BookId, BookRepository, BookRequest, HttpBookRepository, Segment};
use crate::config::ReaderConfig;
use crate::job::{HttpEventTransport, JobSubmissionClient, PipelineStage, ProgressUpdate};
use crate::playback::{reading_time, PlaybackController, PlaybackPhase, SimulatedDevice};
use clap::{Parser, Subcommand};
use std::collections::HashMap;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

const READER_HELP: &str =
    "[enter] play/pause  n next  b back  r rate  <number> jump to sentence  q quit";

#[derive(Parser, Debug, Clone)]
#[command(name = "interlinear-reader", about = "Narrated interlinear reader")]
pub struct CliArgs {
    /// Config file (defaults to the user config dir)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Override the backend API base URL
    #[arg(long, global = true)]
    pub api_url: Option<String>,

    /// Enable debug logging
    #[arg(long, global = true)]
    pub debug: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Submit a text, follow the pipeline and print the finished book id
    Process {
        #[arg(long)]
        title: String,
        /// Plain text file with the source text
        #[arg(long)]
        file: PathBuf,
    },
    /// List finished books
    Books,
    /// Print a book with its gloss and translation
    Show { id: String },
    /// Step through a book with simulated narration
    Read { id: String },
}

pub async fn execute(args: CliArgs, config: ReaderConfig) -> Result<(), String> {
    let repository = Arc::new(HttpBookRepository::new(&config));

    match args.command {
        Command::Process { title, file } => process(&config, repository, title, file).await,
        Command::Books => list_books(repository.as_ref()).await,
        Command::Show { id } => show_book(&config, repository.as_ref(), BookId::new(id)).await,
        Command::Read { id } => read_book(&config, repository.as_ref(), BookId::new(id)).await,
    }
}

async fn process(
    config: &ReaderConfig,
    repository: Arc<HttpBookRepository>,
    title: String,
    file: PathBuf,
) -> Result<(), String> {
    let text = std::fs::read_to_string(&file)
        .map_err(|e| format!("Failed to read {}: {}", file.display(), e))?;

    let transport = Arc::new(HttpEventTransport::new(config));
    let client = JobSubmissionClient::new(repository, transport, config);

    let job_id = client
        .submit(&BookRequest::new(title, text))
        .await
        .map_err(|e| e.to_string())?;
    println!("Job {} started", job_id);

    let book_id = client
        .await_completion(&job_id, |update| println!("{}", progress_line(update)))
        .await
        .map_err(|e| e.to_string())?;

    let document = client
        .repository()
        .fetch(&book_id)
        .await
        .map_err(|e| e.to_string())?;
    println!(
        "Book {} ready: '{}' ({} sentences)",
        document.id,
        document.title,
        document.segments.len()
    );
    Ok(())
}

async fn list_books(repository: &HttpBookRepository) -> Result<(), String> {
    let books = repository.list().await.map_err(|e| e.to_string())?;
    if books.is_empty() {
        println!("No books yet");
    }
    for book in books {
        println!("{}  {}", book.id, book.title);
    }
    Ok(())
}

async fn show_book(config: &ReaderConfig, repository: &HttpBookRepository, id: BookId) -> Result<(), String> {
    let document = repository.fetch(&id).await.map_err(|e| e.to_string())?;
    println!("{}\n", document.title);
    for (index, segment) in document.segments.iter().enumerate() {
        println!("{}", segment_block(index, segment));
        match segment.audio_url.as_deref() {
            Some(url) if segment.has_audio() => println!("    audio: {}", config.resolve_media_url(url)),
            _ => println!("    audio: (none)"),
        }
        println!();
    }
    Ok(())
}

async fn read_book(config: &ReaderConfig, repository: &HttpBookRepository, id: BookId) -> Result<(), String> {
    let document = repository.fetch(&id).await.map_err(|e| e.to_string())?;

    let estimates: HashMap<String, Duration> = document
        .segments
        .iter()
        .filter(|segment| segment.has_audio())
        .filter_map(|segment| {
            let url = segment.audio_url.as_deref()?;
            Some((config.resolve_media_url(url), reading_time(segment)))
        })
        .collect();

    let (events_tx, mut events) = mpsc::unbounded_channel();
    let device = SimulatedDevice::new(events_tx, move |url| {
        estimates.get(url).copied().unwrap_or(Duration::from_secs(3))
    });
    let mut player = PlaybackController::new(
        device,
        config.missing_audio_policy(),
        config.media_origin.clone(),
    );

    let title = document.title.clone();
    player.load(document).map_err(|e| e.to_string())?;
    println!("{}\n{}\n", title, READER_HELP);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut shown: Option<(PlaybackPhase, Option<usize>)> = None;
    if let Err(e) = player.play() {
        println!("{}", e);
    }

    loop {
        let view = (player.phase(), player.highlighted_token());
        if shown != Some(view) {
            redraw(&player, shown.map(|(phase, _)| phase));
            shown = Some(view);
        }

        tokio::select! {
            Some(event) = events.recv() => player.handle_event(event),
            line = lines.next_line() => {
                let Ok(Some(line)) = line else { break };
                if !apply_command(&mut player, line.trim()) {
                    break;
                }
            }
        }
    }

    player.unload();
    println!();
    Ok(())
}

/// Returns `false` when the reader should close
fn apply_command(player: &mut PlaybackController<SimulatedDevice>, command: &str) -> bool {
    let result = match command {
        "q" | "quit" => return false,
        "" | "p" => player.toggle(),
        "n" => player.next(),
        "b" => player.previous(),
        "r" => {
            println!("\nrate {}x", player.cycle_rate());
            Ok(())
        }
        other => match other.parse::<usize>() {
            Ok(number) if number > 0 => player.seek_to_segment(number - 1),
            _ => {
                println!("\n{}", READER_HELP);
                Ok(())
            }
        },
    };

    if let Err(e) = result {
        println!("\n{}", e);
    }
    true
}

fn redraw(player: &PlaybackController<SimulatedDevice>, previous: Option<PlaybackPhase>) {
    let Some(segment) = player.active_segment() else {
        return;
    };
    let index = player.state().active_segment;
    let phase = player.phase();

    let segment_of = |phase: PlaybackPhase| match phase {
        PlaybackPhase::Playing(i) | PlaybackPhase::Paused(i) => Some(i),
        PlaybackPhase::Idle => None,
    };
    let moved = previous.and_then(segment_of) != segment_of(phase);
    if moved {
        println!("\n\n{}", segment_block(index, segment));
    }

    let marker = match phase {
        PlaybackPhase::Playing(_) if player.state().stalled => "..",
        PlaybackPhase::Playing(_) => ">",
        _ => "||",
    };
    print!("\r\x1b[2K{} {}", marker, highlighted_line(segment, player.highlighted_token()));
    let _ = std::io::stdout().flush();
}

pub fn progress_line(update: &ProgressUpdate) -> String {
    let percent = |stage| (update.fraction(stage) * 100.0).round() as u32;
    format!(
        "[{}] translated {}/{} ({}%), narrated {}/{} ({}%) {}",
        update.stage,
        update.translated,
        update.total,
        percent(PipelineStage::Translating),
        update.synthesized,
        update.total,
        percent(PipelineStage::Synthesizing),
        update.message
    )
    .trim_end()
    .to_string()
}

/// Original sentence, word-by-word gloss and translation
pub fn segment_block(index: usize, segment: &Segment) -> String {
    let gloss = segment
        .tokens
        .iter()
        .map(|token| match token.gloss.as_deref() {
            Some(gloss) => format!("{}({})", token.source, gloss),
            None => token.source.clone(),
        })
        .collect::<Vec<_>>()
        .join(" ");

    let mut block = format!("{:>3}. {}", index + 1, segment.original);
    if !gloss.is_empty() {
        block.push_str(&format!("\n     {}", gloss));
    }
    block.push_str(&format!("\n     {}", segment.translation));
    block
}

/// Tokens with the spoken one bracketed
pub fn highlighted_line(segment: &Segment, highlight: Option<usize>) -> String {
    if segment.tokens.is_empty() {
        return segment.original.clone();
    }
    segment
        .tokens
        .iter()
        .enumerate()
        .map(|(i, token)| {
            if Some(i) == highlight {
                format!("[{}]", token.source)
            } else {
                token.source.clone()
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::book::Token;

    fn segment() -> Segment {
        Segment {
            id: 0,
            original: "Hola mundo.".to_string(),
            translation: "Hello world.".to_string(),
            tokens: vec![
                Token {
                    id: 0,
                    source: "Hola".to_string(),
                    gloss: Some("Hello".to_string()),
                },
                Token {
                    id: 1,
                    source: "mundo".to_string(),
                    gloss: None,
                },
            ],
            audio_url: None,
        }
    }

    #[test]
    fn test_segment_block() {
        assert_eq!(
            segment_block(0, &segment()),
            "  1. Hola mundo.\n     Hola(Hello) mundo\n     Hello world."
        );
    }

    #[test]
    fn test_highlighted_line() {
        assert_eq!(highlighted_line(&segment(), Some(1)), "Hola [mundo]");
        assert_eq!(highlighted_line(&segment(), None), "Hola mundo");
    }

    #[test]
    fn test_progress_line() {
        let update = ProgressUpdate {
            stage: PipelineStage::Synthesizing,
            translated: 2,
            synthesized: 1,
            total: 2,
            message: String::new(),
        };
        assert_eq!(
            progress_line(&update),
            "[synthesizing] translated 2/2 (100%), narrated 1/2 (50%)"
        );
    }

    #[test]
    fn test_parse_read_command() {
        let args = CliArgs::try_parse_from(["interlinear-reader", "--debug", "read", "b1"]).unwrap();
        assert!(args.debug);
        assert!(matches!(args.command, Command::Read { id } if id == "b1"));
    }
}
