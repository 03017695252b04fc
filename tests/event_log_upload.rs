//! End-to-end delivery of event log batches to an HTTP collector.

use std::io::{BufRead, BufReader, Read, Write};
use std::net::TcpListener;
use std::thread;
use std::time::{Duration, Instant};

use serde_json::Value;

use obstacle_signal::{ObstaclePipeline, PipelineConfig, RawModelOutput};

/// Accept one POST, reply 200 and return the request path and JSON body.
fn one_shot_collector() -> (String, thread::JoinHandle<(String, Value)>) {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind collector");
    let endpoint = format!("http://{}/logs", listener.local_addr().unwrap());
    let join = thread::spawn(move || {
        let (stream, _) = listener.accept().expect("accept");
        let mut reader = BufReader::new(stream);

        let mut request_line = String::new();
        reader.read_line(&mut request_line).unwrap();
        let mut content_length = 0usize;
        loop {
            let mut header = String::new();
            reader.read_line(&mut header).unwrap();
            let header = header.trim_end();
            if header.is_empty() {
                break;
            }
            if let Some((name, value)) = header.split_once(':') {
                if name.eq_ignore_ascii_case("content-length") {
                    content_length = value.trim().parse().unwrap();
                }
            }
        }
        let mut body = vec![0u8; content_length];
        reader.read_exact(&mut body).unwrap();

        let mut stream = reader.into_inner();
        stream
            .write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 0\r\nConnection: close\r\n\r\n")
            .unwrap();
        (request_line, serde_json::from_slice(&body).unwrap())
    });
    (endpoint, join)
}

#[test]
fn full_batch_is_posted_and_acknowledged() {
    let (endpoint, collector) = one_shot_collector();

    let mut config = PipelineConfig::default();
    config.event_log.enabled = true;
    config.event_log.batch_size = 2;
    config.event_log.max_entries = 10;
    config.event_log.endpoint = Some(endpoint);
    config.validate().unwrap();

    let mut pipeline = ObstaclePipeline::new(&config).expect("pipeline");
    for i in 0..2u64 {
        let frame = RawModelOutput::from_boxes(&[[0.3, 0.4, 0.9, 0.6]], &[0.8], i);
        pipeline.process(&frame, 1_700_000_000_000 + i * 100);
    }

    let (request_line, body) = collector.join().expect("collector");
    assert!(request_line.starts_with("POST /logs "));
    let events = body["events"].as_array().expect("events array");
    assert_eq!(events.len(), 2);
    assert_eq!(events[0]["timestamp"], 1_700_000_000_000u64);
    assert_eq!(events[1]["detected"], true);
    assert!(events[0].get("centerX").is_some());

    let logger = pipeline.event_logger().expect("logger enabled");
    let deadline = Instant::now() + Duration::from_secs(5);
    while !logger.is_empty() && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(10));
    }
    assert!(logger.is_empty());
}
