fn main() {
    println!("Run `cargo test -p ingest-compat` to execute the end-to-end ingest tests.");
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use datalift_archive::RECORD_SIZE;
    use datalift_client::{IngestConfig, IngestSession};
    use datalift_inventory::build_inventory;
    use datalift_upload::{UploadError, UploadJob, UploadPipeline};
    use datalift_protocol::UploadMetadata;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};
    use tokio::sync::mpsc;

    /// Shared state of the scripted ingest server.
    #[derive(Default)]
    struct ServerState {
        /// JSON body returned by the file-listing endpoint.
        listing_json: String,
        /// XML body returned by the status endpoint.
        status_xml: String,
        /// Content-Length of every PUT body received, in order.
        put_lengths: Vec<u64>,
        next_job_id: u64,
    }

    /// A minimal scripted ingest server: file listing, preallocate,
    /// archive PUT, status. Serves connections until aborted.
    async fn spawn_server(
        state: Arc<Mutex<ServerState>>,
    ) -> (String, tokio::task::JoinHandle<()>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let url = format!("http://127.0.0.1:{port}");

        let handle = tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    return;
                };
                let state = Arc::clone(&state);
                tokio::spawn(async move {
                    handle_connection(stream, state).await;
                });
            }
        });

        (url, handle)
    }

    async fn handle_connection(mut stream: TcpStream, state: Arc<Mutex<ServerState>>) {
        let request = read_request(&mut stream).await;
        let header_end = match find_header_end(&request) {
            Some(pos) => pos,
            None => return,
        };
        let headers = String::from_utf8_lossy(&request[..header_end]).into_owned();
        let request_line = headers.lines().next().unwrap_or_default().to_string();
        let mut parts = request_line.split_whitespace();
        let method = parts.next().unwrap_or_default().to_string();
        let path = parts.next().unwrap_or_default().to_string();
        let body_len = (request.len() - header_end - 4) as u64;

        let response_body = {
            let mut st = state.lock().unwrap();
            if path.starts_with("/fileinfo/files_for_keyvalue/") {
                st.listing_json.clone()
            } else if path == "/preallocate" {
                st.next_job_id += 1;
                format!(r#"{{"job_id": {}}}"#, st.next_job_id)
            } else if method == "PUT" && path.starts_with("/upload/") {
                st.put_lengths.push(body_len);
                "Accepted".to_string()
            } else if path.starts_with("/get_state") {
                st.status_xml.clone()
            } else {
                String::new()
            }
        };

        let resp = format!(
            "HTTP/1.1 200 OK\r\nContent-Type: text/plain\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
            response_body.len(),
            response_body
        );
        let _ = stream.write_all(resp.as_bytes()).await;
        let _ = stream.shutdown().await;
    }

    /// Reads headers plus a Content-Length body if one is declared.
    async fn read_request(stream: &mut TcpStream) -> Vec<u8> {
        let mut request = Vec::new();
        let mut buf = [0u8; 16384];

        let header_end = loop {
            let Ok(n) = stream.read(&mut buf).await else {
                return request;
            };
            if n == 0 {
                return request;
            }
            request.extend_from_slice(&buf[..n]);
            if let Some(pos) = find_header_end(&request) {
                break pos;
            }
        };

        let headers = String::from_utf8_lossy(&request[..header_end]).into_owned();
        let content_length = headers
            .lines()
            .find_map(|l| {
                l.to_ascii_lowercase()
                    .strip_prefix("content-length:")
                    .map(|v| v.trim().to_string())
            })
            .and_then(|v| v.parse::<usize>().ok())
            .unwrap_or(0);

        let expected = header_end + 4 + content_length;
        while request.len() < expected {
            let Ok(n) = stream.read(&mut buf).await else {
                break;
            };
            if n == 0 {
                break;
            }
            request.extend_from_slice(&buf[..n]);
        }
        request
    }

    fn find_header_end(data: &[u8]) -> Option<usize> {
        data.windows(4).position(|w| w == b"\r\n\r\n")
    }

    fn complete_status_xml() -> String {
        r#"<root>
            <step id='0' message='completed' status='SUCCESS'/>
            <step id='1' message='completed' status='SUCCESS'/>
            <step id='2' message='completed' status='SUCCESS'/>
            <step id='3' message='verified' status='SUCCESS'/>
            <step id='4' message='completed' status='SUCCESS'/>
            <step id='5' message='completed' status='SUCCESS'/>
        </root>"#
            .to_string()
    }

    fn metadata() -> UploadMetadata {
        UploadMetadata {
            dataset_id: 814215,
            instrument_id: 34009,
            proposal_id: "60328".into(),
            submitter_id: 55120,
            ..Default::default()
        }
    }

    /// Builds the listing JSON the server would hold after the given local
    /// tree was stored.
    fn listing_for(root: &std::path::Path) -> String {
        let records = build_inventory(root, true, None).unwrap();
        let entries: Vec<serde_json::Value> = records
            .iter()
            .map(|r| {
                serde_json::json!({
                    "name": r.file_name,
                    "subdir": if r.subdir.is_empty() {
                        "data".to_string()
                    } else {
                        format!("data/{}", r.subdir)
                    },
                    "hashsum": r.hashsum,
                    "hashtype": "sha1",
                    "size": r.size,
                    "transaction_id": 1,
                })
            })
            .collect();
        serde_json::to_string(&entries).unwrap()
    }

    fn make_dataset() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("spectra.raw"), vec![0x41u8; 2000]).unwrap();
        std::fs::create_dir_all(dir.path().join("QC")).unwrap();
        std::fs::write(dir.path().join("QC").join("report.txt"), b"all good").unwrap();
        std::fs::write(dir.path().join("QC").join("tic.png"), vec![0x89u8; 700]).unwrap();
        dir
    }

    #[tokio::test]
    async fn upload_then_second_pass_is_idempotent() {
        let dataset = make_dataset();
        let state = Arc::new(Mutex::new(ServerState {
            listing_json: "[]".into(),
            status_xml: complete_status_xml(),
            ..Default::default()
        }));
        let (url, server) = spawn_server(Arc::clone(&state)).await;

        let session = IngestSession::new(IngestConfig::new(&url, &url)).unwrap();
        let pipeline = UploadPipeline::new(&session);
        let job = UploadJob::new(dataset.path(), metadata());

        // First pass: everything is new.
        let (events_tx, _events_rx) = mpsc::channel(1024);
        let outcome = pipeline.run(&job, &events_tx).await.unwrap();
        assert_eq!(outcome.new_files, 3);
        assert_eq!(outcome.updated_files, 0);
        assert_eq!(outcome.uploaded_bytes, 2000 + 8 + 700);
        assert!(outcome.job_id.is_some());

        // The PUT body length is exactly the advertised archive size and a
        // whole number of tar records.
        {
            let st = state.lock().unwrap();
            assert_eq!(st.put_lengths.len(), 1);
            assert_eq!(st.put_lengths[0], outcome.archive_bytes);
            assert_eq!(st.put_lengths[0] % RECORD_SIZE, 0);
        }

        // Second pass against a listing that now mirrors the dataset:
        // nothing to upload, no further PUT.
        state.lock().unwrap().listing_json = listing_for(dataset.path());

        let (events_tx, _events_rx) = mpsc::channel(1024);
        let outcome = pipeline.run(&job, &events_tx).await.unwrap();
        assert_eq!(outcome.uploaded_files(), 0);
        assert_eq!(outcome.uploaded_bytes, 0);
        assert_eq!(outcome.archive_bytes, 0);
        assert_eq!(outcome.job_id, None);
        assert_eq!(state.lock().unwrap().put_lengths.len(), 1);

        server.abort();
    }

    #[tokio::test]
    async fn changed_file_uploads_only_the_change() {
        let dataset = make_dataset();
        let state = Arc::new(Mutex::new(ServerState {
            listing_json: listing_for(dataset.path()),
            status_xml: complete_status_xml(),
            ..Default::default()
        }));
        let (url, server) = spawn_server(Arc::clone(&state)).await;

        // Modify one file after the listing snapshot.
        std::fs::write(dataset.path().join("QC").join("report.txt"), b"reprocessed").unwrap();

        let session = IngestSession::new(IngestConfig::new(&url, &url)).unwrap();
        let pipeline = UploadPipeline::new(&session);
        let job = UploadJob::new(dataset.path(), metadata());

        let (events_tx, _events_rx) = mpsc::channel(1024);
        let outcome = pipeline.run(&job, &events_tx).await.unwrap();
        assert_eq!(outcome.new_files, 0);
        assert_eq!(outcome.updated_files, 1);
        assert_eq!(outcome.uploaded_bytes, b"reprocessed".len() as u64);

        server.abort();
    }

    #[tokio::test]
    async fn permission_denied_step_error_is_distinguished() {
        let dataset = make_dataset();
        let state = Arc::new(Mutex::new(ServerState {
            listing_json: "[]".into(),
            status_xml: "<step id='5' status='ERROR' \
                message='You do not have upload permissions to proposal 17797'/>"
                .into(),
            ..Default::default()
        }));
        let (url, server) = spawn_server(Arc::clone(&state)).await;

        let session = IngestSession::new(IngestConfig::new(&url, &url)).unwrap();
        let pipeline = UploadPipeline::new(&session);
        let job = UploadJob::new(dataset.path(), metadata());

        let (events_tx, _events_rx) = mpsc::channel(1024);
        let err = pipeline.run(&job, &events_tx).await.unwrap_err();
        match &err {
            UploadError::IngestState {
                message,
                permissions_denied,
                ..
            } => {
                assert!(message.contains("proposal 17797"));
                assert!(*permissions_denied);
            }
            other => panic!("expected IngestState, got {other:?}"),
        }
        assert!(err.permissions_denied());
        assert!(!err.is_retryable());

        // The archive did go out; the failure came from the state machine.
        assert_eq!(state.lock().unwrap().put_lengths.len(), 1);

        server.abort();
    }
}
