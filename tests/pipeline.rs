// End-to-end: submit, follow the SSE stream, fetch, then load into the player.
// A minimal HTTP server with canned responses stands in for the backend.

use interlinear_reader_lib::book::{BookRequest, BookSummary, FetchError};
use interlinear_reader_lib::job::{HttpEventTransport, JobError, PipelineStage};
use interlinear_reader_lib::playback::{
    ClipId, ClipSource, MissingAudioPolicy, PlaybackDeviceError,
};
use interlinear_reader_lib::{
    BookId, BookRepository, HttpBookRepository, JobSubmissionClient, PlaybackController,
    PlaybackDevice, PlaybackPhase, ReaderConfig,
};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

const BOOK_JSON: &str = r#"{
  "id": "b1",
  "title": "Hola",
  "segments": [
    {"id": 0, "original_text": "Hola mundo.", "translation_text": "Hello world.",
     "tokens": [{"source_word": "Hola", "gloss_word": "Hello"}, {"source_word": "mundo", "gloss_word": "world"}],
     "audio_url": "/static/audio_b1_0.wav"},
    {"id": 1, "original_text": "Adios.", "translation_text": "Goodbye.",
     "tokens": [{"source_word": "Adios", "gloss_word": "Goodbye"}],
     "audio_url": "/static/audio_b1_1.wav"}
  ]
}"#;

struct Route {
    content_type: &'static str,
    status: &'static str,
    body: String,
}

fn json(status: &'static str, body: &str) -> Route {
    Route {
        content_type: "application/json",
        status,
        body: body.to_string(),
    }
}

fn sse(events: &[&str]) -> Route {
    Route {
        content_type: "text/event-stream",
        status: "200 OK",
        body: events.iter().map(|e| format!("data: {}\n\n", e)).collect(),
    }
}

async fn serve(routes: HashMap<&'static str, Route>) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let routes = Arc::new(routes);

    tokio::spawn(async move {
        while let Ok((socket, _)) = listener.accept().await {
            let routes = routes.clone();
            tokio::spawn(async move { respond(socket, &routes).await });
        }
    });
    addr
}

async fn respond(mut socket: TcpStream, routes: &HashMap<&'static str, Route>) {
    let mut request = Vec::new();
    let mut buf = [0u8; 4096];
    let header_end = loop {
        let n = match socket.read(&mut buf).await {
            Ok(0) | Err(_) => return,
            Ok(n) => n,
        };
        request.extend_from_slice(&buf[..n]);
        if let Some(pos) = request.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
    };

    let head = String::from_utf8_lossy(&request[..header_end]).to_string();
    let content_length = head
        .lines()
        .find_map(|line| {
            let (name, value) = line.split_once(':')?;
            name.eq_ignore_ascii_case("content-length")
                .then(|| value.trim().parse::<usize>().ok())
                .flatten()
        })
        .unwrap_or(0);
    while request.len() < header_end + content_length {
        match socket.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => request.extend_from_slice(&buf[..n]),
        }
    }

    let request_line = head.lines().next().unwrap_or_default();
    let key = request_line.rsplitn(2, ' ').nth(1).unwrap_or_default();
    let response = match routes.get(key) {
        Some(route) => format!(
            "HTTP/1.1 {}\r\nContent-Type: {}\r\nConnection: close\r\n\r\n{}",
            route.status, route.content_type, route.body
        ),
        None => "HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\nConnection: close\r\n\r\n"
            .to_string(),
    };
    let _ = socket.write_all(response.as_bytes()).await;
    let _ = socket.shutdown().await;
}

fn config_for(addr: SocketAddr) -> ReaderConfig {
    ReaderConfig {
        api_url: format!("http://{}/api", addr),
        media_origin: format!("http://{}", addr),
        request_timeout_secs: 5,
        ..Default::default()
    }
}

fn client_for(config: &ReaderConfig) -> JobSubmissionClient<HttpBookRepository> {
    JobSubmissionClient::new(
        Arc::new(HttpBookRepository::new(config)),
        Arc::new(HttpEventTransport::new(config)),
        config,
    )
}

#[derive(Clone, Default)]
struct RecordingDevice {
    loads: Arc<Mutex<Vec<(ClipId, ClipSource)>>>,
}

impl PlaybackDevice for RecordingDevice {
    fn load(&mut self, clip: ClipId, source: ClipSource) -> Result<(), PlaybackDeviceError> {
        self.loads.lock().unwrap().push((clip, source));
        Ok(())
    }

    fn play(&mut self) -> Result<(), PlaybackDeviceError> {
        Ok(())
    }

    fn pause(&mut self) {}

    fn set_rate(&mut self, _rate: f32) {}

    fn stop(&mut self) {}
}

#[tokio::test]
async fn test_process_then_read() {
    let mut routes = HashMap::new();
    routes.insert("POST /api/process", json("200 OK", r#"{"job_id": "j1"}"#));
    routes.insert(
        "GET /api/jobs/j1/stream",
        sse(&[
            r#"{"status":"progress","translation":1,"audio":0,"total":2}"#,
            r#"{"status":"progress","translation":2,"audio":0,"total":2}"#,
            r#"{"status":"progress","translation":2,"audio":1,"total":2}"#,
            r#"{"status":"progress","translation":2,"audio":2,"total":2}"#,
            r#"{"status":"completed","book_id":"b1"}"#,
        ]),
    );
    routes.insert("GET /api/books/b1", json("200 OK", BOOK_JSON));
    let addr = serve(routes).await;

    let config = config_for(addr);
    let client = client_for(&config);

    let mut seen = Vec::new();
    let document = client
        .process(&BookRequest::new("Hola", "Hola mundo. Adios."), |update| {
            seen.push((update.stage, update.translated, update.synthesized));
        })
        .await
        .unwrap();

    assert_eq!(
        seen,
        vec![
            (PipelineStage::Translating, 1, 0),
            (PipelineStage::Synthesizing, 2, 0),
            (PipelineStage::Synthesizing, 2, 1),
            (PipelineStage::Synthesizing, 2, 2),
        ]
    );
    assert_eq!(document.id, BookId::new("b1"));
    assert_eq!(document.segments.len(), 2);
    assert_eq!(document.segments[0].tokens[1].gloss.as_deref(), Some("world"));
    assert!(!client.registry().is_open(&interlinear_reader_lib::JobId::new("j1")));

    let device = RecordingDevice::default();
    let loads = device.loads.clone();
    let mut player = PlaybackController::new(
        device,
        MissingAudioPolicy::AdvanceAfterReadingTime,
        config.media_origin.clone(),
    );
    player.load(document).unwrap();

    assert_eq!(player.phase(), PlaybackPhase::Paused(0));
    assert_eq!(player.highlighted_token(), None);
    let first = loads.lock().unwrap().last().cloned().unwrap();
    assert_eq!(
        first.1,
        ClipSource::Url(format!("http://{}/static/audio_b1_0.wav", addr))
    );
}

#[tokio::test]
async fn test_pipeline_failure_reports_stage() {
    let mut routes = HashMap::new();
    routes.insert("POST /api/process", json("200 OK", r#"{"job_id": "j2"}"#));
    routes.insert(
        "GET /api/jobs/j2/stream",
        sse(&[
            r#"{"status":"progress","translation":1,"audio":0,"total":1}"#,
            r#"{"status":"failed","message":"TTS quota exceeded"}"#,
        ]),
    );
    let addr = serve(routes).await;
    let client = client_for(&config_for(addr));

    let err = client
        .process(&BookRequest::new("Uno", "Uno."), |_| {})
        .await
        .unwrap_err();
    match err {
        JobError::Pipeline { stage, message } => {
            assert_eq!(stage, PipelineStage::Synthesizing);
            assert_eq!(message, "TTS quota exceeded");
        }
        other => panic!("unexpected error: {}", other),
    }
}

#[tokio::test]
async fn test_stream_cut_short_is_connection_failure() {
    let mut routes = HashMap::new();
    routes.insert("POST /api/process", json("200 OK", r#"{"job_id": "j3"}"#));
    routes.insert(
        "GET /api/jobs/j3/stream",
        sse(&[r#"{"status":"progress","translation":0,"audio":0,"total":3}"#]),
    );
    let addr = serve(routes).await;
    let client = client_for(&config_for(addr));

    let err = client
        .process(&BookRequest::new("Tres", "Uno. Dos. Tres."), |_| {})
        .await
        .unwrap_err();
    assert!(matches!(err, JobError::StreamConnection(_)));
}

#[tokio::test]
async fn test_rejected_submission() {
    let mut routes = HashMap::new();
    routes.insert(
        "POST /api/process",
        json("422 Unprocessable Entity", r#"{"detail": "text too long"}"#),
    );
    let addr = serve(routes).await;
    let client = client_for(&config_for(addr));

    let err = client
        .process(&BookRequest::new("Big", "..."), |_| {})
        .await
        .unwrap_err();
    assert!(err.to_string().contains("422"));
}

#[tokio::test]
async fn test_unknown_book_not_found() {
    let addr = serve(HashMap::new()).await;
    let repository = HttpBookRepository::new(&config_for(addr));

    let err = repository.fetch(&BookId::new("missing")).await.unwrap_err();
    assert!(matches!(err, FetchError::NotFound(id) if id == BookId::new("missing")));
}

#[tokio::test]
async fn test_list_books() {
    let mut routes = HashMap::new();
    routes.insert(
        "GET /api/books",
        json(
            "200 OK",
            r#"[{"id": "b1", "title": "Hola"}, {"id": "b2", "title": "Adios"}]"#,
        ),
    );
    let addr = serve(routes).await;
    let repository = HttpBookRepository::new(&config_for(addr));

    let books = repository.list().await.unwrap();
    assert_eq!(
        books,
        vec![
            BookSummary {
                id: BookId::new("b1"),
                title: "Hola".to_string(),
            },
            BookSummary {
                id: BookId::new("b2"),
                title: "Adios".to_string(),
            },
        ]
    );
}

#[tokio::test]
async fn test_null_book_body_is_not_found() {
    let mut routes = HashMap::new();
    routes.insert("GET /api/books/gone", json("200 OK", "null"));
    let addr = serve(routes).await;
    let repository = HttpBookRepository::new(&config_for(addr));

    let err = repository.fetch(&BookId::new("gone")).await.unwrap_err();
    assert!(matches!(err, FetchError::NotFound(id) if id == BookId::new("gone")));
}
