//! Envoy Access Log Service (ALS) gRPC implementation.
//!
//! Client-streaming RPC carrying batched HTTP access logs. The handler
//! performs exactly one receive per invocation, decodes the batch and
//! writes one LTSV line per entry through the buffer pool; the gRPC
//! library owns the stream lifecycle.

use std::fmt;
use std::io::Write;
use std::sync::Arc;

use envoy_types::pb::envoy::service::accesslog::v3::{
    access_log_service_server::AccessLogService, stream_access_logs_message::LogEntries,
    StreamAccessLogsMessage, StreamAccessLogsResponse,
};
use parking_lot::Mutex;
use tonic::{Request, Response, Status, Streaming};
use tracing::{debug, warn};

use super::{AccessLogRecord, BufferPool};

/// ALS handler: a shared buffer pool plus the output sink.
#[derive(Clone)]
pub struct AccessLogStreamService {
    pool: Arc<BufferPool>,
    writer: Arc<Mutex<Box<dyn Write + Send>>>,
}

impl fmt::Debug for AccessLogStreamService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessLogStreamService").finish_non_exhaustive()
    }
}

impl AccessLogStreamService {
    /// Production sink: stdout.
    pub fn stdout() -> Self {
        Self::with_writer(Box::new(std::io::stdout()))
    }

    pub fn with_writer(writer: Box<dyn Write + Send>) -> Self {
        Self {
            pool: Arc::new(BufferPool::default()),
            writer: Arc::new(Mutex::new(writer)),
        }
    }

    fn handle_message(&self, message: StreamAccessLogsMessage) {
        let log_id = message
            .identifier
            .map(|identifier| identifier.log_name)
            .unwrap_or_default();

        let Some(LogEntries::HttpLogs(http_logs)) = message.log_entries else {
            debug!(log_id = %log_id, "ignoring non-HTTP access log batch");
            return;
        };

        let records: Vec<AccessLogRecord> =
            http_logs.log_entry.iter().map(AccessLogRecord::from_entry).collect();

        for record in &records {
            let mut buf = self.pool.acquire();
            record.write_to(&log_id, &mut buf);
            if let Err(error) = self.writer.lock().write_all(&buf) {
                warn!(%error, "failed to write access log line");
            }
            self.pool.release(buf);
        }
    }
}

#[tonic::async_trait]
impl AccessLogService for AccessLogStreamService {
    async fn stream_access_logs(
        &self,
        request: Request<Streaming<StreamAccessLogsMessage>>,
    ) -> Result<Response<StreamAccessLogsResponse>, Status> {
        let mut stream = request.into_inner();

        let message = stream.message().await.map_err(|status| {
            warn!(error = %status, "failed to receive access log message");
            status
        })?;

        if let Some(message) = message {
            self.handle_message(message);
        }

        Ok(Response::new(StreamAccessLogsResponse {}))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use envoy_types::pb::envoy::data::accesslog::v3::{
        AccessLogCommon, HttpAccessLogEntry, HttpRequestProperties, HttpResponseProperties,
    };
    use envoy_types::pb::envoy::service::accesslog::v3::stream_access_logs_message::{
        HttpAccessLogEntries, Identifier,
    };
    use envoy_types::pb::google::protobuf::UInt32Value;

    #[derive(Clone, Default)]
    struct SharedSink(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedSink {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    fn entry(route: &str, status: u32) -> HttpAccessLogEntry {
        HttpAccessLogEntry {
            common_properties: Some(AccessLogCommon {
                route_name: route.to_string(),
                ..Default::default()
            }),
            request: Some(HttpRequestProperties {
                path: "/x".to_string(),
                ..Default::default()
            }),
            response: Some(HttpResponseProperties {
                response_code: Some(UInt32Value { value: status }),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    fn message(log_id: &str, entries: Vec<HttpAccessLogEntry>) -> StreamAccessLogsMessage {
        StreamAccessLogsMessage {
            identifier: Some(Identifier {
                log_name: log_id.to_string(),
                ..Default::default()
            }),
            log_entries: Some(LogEntries::HttpLogs(HttpAccessLogEntries {
                log_entry: entries,
            })),
        }
    }

    #[test]
    fn test_batch_writes_one_line_per_entry() {
        let sink = SharedSink::default();
        let service = AccessLogStreamService::with_writer(Box::new(sink.clone()));

        service.handle_message(message("front-http", vec![entry("r1", 200), entry("r2", 502)]));

        let output = String::from_utf8(sink.0.lock().clone()).unwrap();
        let lines: Vec<&str> = output.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("id:front-http\t"));
        assert!(lines[0].contains("route:r1\t"));
        assert!(lines[0].contains("status:200\t"));
        assert!(lines[1].contains("route:r2\t"));
        assert!(lines[1].contains("status:502\t"));
    }

    #[test]
    fn test_missing_identifier_renders_dash() {
        let sink = SharedSink::default();
        let service = AccessLogStreamService::with_writer(Box::new(sink.clone()));

        let mut msg = message("ignored", vec![entry("r1", 200)]);
        msg.identifier = None;
        service.handle_message(msg);

        let output = String::from_utf8(sink.0.lock().clone()).unwrap();
        assert!(output.starts_with("id:-\t"));
    }

    #[test]
    fn test_non_http_batch_is_ignored() {
        let sink = SharedSink::default();
        let service = AccessLogStreamService::with_writer(Box::new(sink.clone()));

        let mut msg = message("front-http", vec![]);
        msg.log_entries = None;
        service.handle_message(msg);

        assert!(sink.0.lock().is_empty());
    }
}
