use std::io::Read as _;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, mpsc};
use std::thread;
use std::time::Duration;

use bookfetch::cli::OutputFormat;
use bookfetch::fetch::{HttpFetcher, HttpFetcherConfig};
use bookfetch::interrupt::InterruptCoordinator;
use bookfetch::pipeline::{
    ChapterRange, DownloadRequest, Orchestrator, PipelineConfig, RunContext, RunOutcome,
};
use bookfetch::site::ShubaSite;
use bookfetch::status_store;

const BOOK_PAGE: &str = r#"<!doctype html>
<html>
  <head><meta charset="utf-8"><title>星海归途</title></head>
  <body>
    <div class="booknav2">
      <h1>星海归途<small>连载中</small></h1>
      <p>作者：林间</p>
    </div>
    <div class="navtxt"><p>一段简介。</p></div>
  </body>
</html>
"#;

const CATALOG_PAGE: &str = r#"<!doctype html>
<html>
  <head><meta charset="utf-8"></head>
  <body>
    <div class="catalog">
      <ul>
        <li><a href="/txt/7/1001">第一章 启程</a></li>
        <li><a href="/txt/7/1002">第二章 远航</a></li>
        <li><a href="/txt/7/1003">第三章 风暴</a></li>
      </ul>
    </div>
  </body>
</html>
"#;

const CHAPTER_ONE: &str = r#"<!doctype html>
<html>
  <head><meta charset="utf-8"></head>
  <body>
    <div class="txtnav">
      <h1>第一章 启程</h1>
      <div class="txtinfo">2024-01-02</div>
      <script>var ad = 1;</script>
      清晨的港口很安静。<br>
      她登上了船。<br>
      <div class="readinline">加入书签</div>
    </div>
  </body>
</html>
"#;

const CHAPTER_TWO: &str = r#"<!doctype html>
<html>
  <head><meta charset="utf-8"></head>
  <body>
    <div class="txtnav">
      <h1>第二章 远航</h1>
      海面一望无际。<br>
      (本章完)
    </div>
  </body>
</html>
"#;

struct BookServer {
    base_url: String,
    broken_hits: Arc<AtomicUsize>,
    shutdown: mpsc::Sender<()>,
    handle: thread::JoinHandle<()>,
}

impl BookServer {
    fn stop(self) {
        let _ = self.shutdown.send(());
        self.handle.join().expect("join test server");
    }
}

fn spawn_book_server() -> BookServer {
    let server = tiny_http::Server::http("127.0.0.1:0").expect("start tiny_http server");
    let base_url = format!("http://{}", server.server_addr());
    let broken_hits = Arc::new(AtomicUsize::new(0));
    let hits = Arc::clone(&broken_hits);

    let (shutdown, shutdown_rx) = mpsc::channel::<()>();
    let handle = thread::spawn(move || {
        loop {
            if shutdown_rx.try_recv().is_ok() {
                break;
            }
            let request = match server.recv_timeout(Duration::from_millis(50)) {
                Ok(Some(req)) => req,
                Ok(None) => continue,
                Err(_) => break,
            };

            let (status, body) = match request.url() {
                "/book/7.htm" => (200, BOOK_PAGE),
                "/book/7/" => (200, CATALOG_PAGE),
                "/txt/7/1001" => (200, CHAPTER_ONE),
                "/txt/7/1002" => (200, CHAPTER_TWO),
                "/txt/7/1003" => {
                    hits.fetch_add(1, Ordering::SeqCst);
                    (500, "upstream error")
                }
                _ => (404, "not found"),
            };
            let header = tiny_http::Header::from_bytes(
                &b"Content-Type"[..],
                &b"text/html; charset=utf-8"[..],
            )
            .expect("content-type header");
            let _ = request.respond(
                tiny_http::Response::from_string(body)
                    .with_status_code(status)
                    .with_header(header),
            );
        }
    });

    BookServer {
        base_url,
        broken_hits,
        shutdown,
        handle,
    }
}

fn read_entry(archive: &mut zip::ZipArchive<std::fs::File>, name: &str) -> String {
    let mut entry = archive.by_name(name).expect("epub entry");
    let mut text = String::new();
    entry.read_to_string(&mut text).expect("read epub entry");
    text
}

#[tokio::test]
async fn downloads_book_over_http_into_epub() {
    let server = spawn_book_server();
    let temp = tempfile::TempDir::new().unwrap();

    let config = PipelineConfig {
        workers: 2,
        fetch_retries: 1,
        retry_delay: Duration::from_millis(1),
        max_retry_rounds: 1,
        round_cooldown: Duration::from_millis(1),
        attempt_timeout: Duration::from_secs(10),
        ..PipelineConfig::default()
    };
    let fetcher = HttpFetcher::new(
        HttpFetcherConfig {
            page_timeout: Duration::from_secs(5),
            render_grace: Duration::ZERO,
            ..HttpFetcherConfig::default()
        },
        config.workers,
    );
    let ctx = Arc::new(RunContext::new(
        config,
        temp.path(),
        Arc::new(fetcher),
        Arc::new(ShubaSite::new(&server.base_url).unwrap()),
        InterruptCoordinator::new(),
    ));
    let request = DownloadRequest {
        book_id: "7".to_owned(),
        format: OutputFormat::Epub,
        range: ChapterRange::default(),
    };

    let outcome = Orchestrator::new(ctx).run(&request).await.unwrap();
    let base_url = server.base_url.clone();
    let broken_hits = server.broken_hits.load(Ordering::SeqCst);
    server.stop();

    let RunOutcome::Finished(summary) = outcome else {
        panic!("expected finished run, got {outcome:?}");
    };
    assert_eq!(summary.book.name, "星海归途");
    assert_eq!(summary.book.author, "林间");
    assert_eq!(summary.succeeded, 2);
    assert_eq!(summary.failures.len(), 1);
    assert_eq!(summary.failures[0].id, "1003");
    assert_eq!(summary.failures[0].index, 3);
    assert_eq!(broken_hits, 2);

    let artifact = summary.artifact.expect("artifact path");
    assert_eq!(artifact, temp.path().join("星海归途.epub"));
    let mut archive = zip::ZipArchive::new(std::fs::File::open(&artifact).unwrap()).unwrap();

    let chapter_one = read_entry(&mut archive, "OEBPS/chap_1.xhtml");
    assert!(chapter_one.contains("清晨的港口很安静。"));
    assert!(chapter_one.contains("她登上了船。"));
    assert!(!chapter_one.contains("2024-01-02"));
    assert!(!chapter_one.contains("加入书签"));
    assert!(!chapter_one.contains("var ad"));

    let chapter_two = read_entry(&mut archive, "OEBPS/chap_2.xhtml");
    assert!(chapter_two.contains("海面一望无际。"));
    assert!(!chapter_two.contains("本章完"));
    assert!(archive.by_name("OEBPS/chap_3.xhtml").is_err());

    let status = status_store::load(temp.path())
        .await
        .into_iter()
        .collect::<Vec<_>>();
    assert_eq!(status, vec!["1001", "1002"]);
    let report = status_store::load_failure_report(temp.path()).await.unwrap();
    assert_eq!(report.len(), 1);
    assert_eq!(report[0].url, format!("{base_url}/txt/7/1003"));
}

#[tokio::test]
async fn missing_book_page_aborts_the_run() {
    let server = spawn_book_server();
    let temp = tempfile::TempDir::new().unwrap();

    let fetcher = HttpFetcher::new(
        HttpFetcherConfig {
            render_grace: Duration::ZERO,
            ..HttpFetcherConfig::default()
        },
        1,
    );
    let ctx = Arc::new(RunContext::new(
        PipelineConfig::default(),
        temp.path(),
        Arc::new(fetcher),
        Arc::new(ShubaSite::new(&server.base_url).unwrap()),
        InterruptCoordinator::new(),
    ));
    let request = DownloadRequest {
        book_id: "404".to_owned(),
        format: OutputFormat::Txt,
        range: ChapterRange::default(),
    };

    let err = Orchestrator::new(ctx).run(&request).await.unwrap_err();
    server.stop();

    assert!(format!("{err:#}").contains("fetch book page"), "{err:#}");
    assert!(!status_store::status_path(temp.path()).exists());
}
