//! Access-log records.
//!
//! Envoy streams batched HTTP access logs to the ALS endpoint; each entry
//! becomes one labeled tab-separated ("LTSV") line through a pooled buffer.
//! Timestamps render in JST. Asia/Tokyo is UTC+9 year-round, so the fixed
//! offset is exact and doubles as the fallback the zone database would
//! otherwise provide.

mod pool;
mod service;

pub use pool::{BufferPool, DEFAULT_BUFFER_SIZE, DEFAULT_POOL_CAPACITY};
pub use service::AccessLogStreamService;

use std::time::Duration;

use bytes::BytesMut;
use chrono::{DateTime, FixedOffset, Utc};
use envoy_types::pb::envoy::config::core::v3::{address, Address};
use envoy_types::pb::envoy::data::accesslog::v3::HttpAccessLogEntry;
use envoy_types::pb::google::protobuf;
use once_cell::sync::Lazy;

const FIELD_DELIMITER: &[u8] = b"\t";
const LINE_FEED: &[u8] = b"\n";
const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f";

static JST: Lazy<FixedOffset> =
    Lazy::new(|| FixedOffset::east_opt(9 * 60 * 60).expect("UTC+9 is a valid offset"));

/// One decoded HTTP access-log entry.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AccessLogRecord {
    pub route: String,
    pub client_address: String,
    pub remote_address: String,
    pub request_time: Option<DateTime<Utc>>,
    pub protocol: String,
    pub request_method: String,
    pub request_path: String,
    pub user_agent: String,
    pub referer: String,
    pub forwarded_for: String,
    pub response_status: u32,
    /// TimeToLastRxByte
    pub request_receive_duration: Duration,
    /// TimeToFirstUpstreamRxByte
    pub response_receiving_duration: Duration,
    /// TimeToLastUpstreamRxByte
    pub response_complete_duration: Duration,
    /// TimeToFirstDownstreamTxByte
    pub client_receiving_duration: Duration,
    /// TimeToLastDownstreamTxByte
    pub client_complete_duration: Duration,
}

impl AccessLogRecord {
    pub fn from_entry(entry: &HttpAccessLogEntry) -> Self {
        let props = entry.common_properties.clone().unwrap_or_default();
        let request = entry.request.clone().unwrap_or_default();
        let response = entry.response.clone().unwrap_or_default();

        Self {
            route: props.route_name.clone(),
            client_address: socket_address(&props.downstream_remote_address),
            remote_address: socket_address(&props.upstream_remote_address),
            request_time: props.start_time.as_ref().and_then(timestamp_to_datetime),
            protocol: entry.protocol_version().as_str_name().to_string(),
            request_method: request.request_method().as_str_name().to_string(),
            request_path: request.path.clone(),
            user_agent: request.user_agent.clone(),
            referer: request.referer.clone(),
            forwarded_for: request.forwarded_for.clone(),
            response_status: response.response_code.map(|code| code.value).unwrap_or(0),
            request_receive_duration: proto_duration(&props.time_to_last_rx_byte),
            response_receiving_duration: proto_duration(&props.time_to_first_upstream_rx_byte),
            response_complete_duration: proto_duration(&props.time_to_last_upstream_rx_byte),
            client_receiving_duration: proto_duration(&props.time_to_first_downstream_tx_byte),
            client_complete_duration: proto_duration(&props.time_to_last_downstream_tx_byte),
        }
    }

    /// Append one LTSV line: `tag:value\t` per field, `\n` terminated,
    /// fields in fixed order, `-` standing in for empty strings.
    pub fn write_to(&self, log_id: &str, buf: &mut BytesMut) {
        let time = self
            .request_time
            .unwrap_or(DateTime::UNIX_EPOCH)
            .with_timezone(&*JST)
            .format(TIME_FORMAT)
            .to_string();

        write_field(buf, "id:", log_id);
        write_field(buf, "time:", &time);
        write_field(buf, "route:", &self.route);
        write_field(buf, "proto:", &self.protocol);
        write_field(buf, "method:", &self.request_method);
        write_field(buf, "status:", &self.response_status.to_string());
        write_field(buf, "path:", &self.request_path);
        write_field(buf, "ua:", &self.user_agent);
        write_field(buf, "referer:", &self.referer);
        write_field(buf, "client:", &self.client_address);
        write_field(buf, "remote:", &self.remote_address);
        write_field(buf, "req.receive:", &format_duration(self.request_receive_duration));
        write_field(buf, "res.receiving:", &format_duration(self.response_receiving_duration));
        write_field(buf, "res.complete:", &format_duration(self.response_complete_duration));
        write_field(buf, "client.receiving:", &format_duration(self.client_receiving_duration));
        write_field(buf, "client.complete:", &format_duration(self.client_complete_duration));
        buf.extend_from_slice(LINE_FEED);
    }
}

fn write_field(buf: &mut BytesMut, tag: &str, value: &str) {
    let value = if value.is_empty() { "-" } else { value };
    buf.extend_from_slice(tag.as_bytes());
    buf.extend_from_slice(value.as_bytes());
    buf.extend_from_slice(FIELD_DELIMITER);
}

fn socket_address(address: &Option<Address>) -> String {
    match address.as_ref().and_then(|a| a.address.as_ref()) {
        Some(address::Address::SocketAddress(socket)) => socket.address.clone(),
        _ => String::new(),
    }
}

fn timestamp_to_datetime(timestamp: &protobuf::Timestamp) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp(timestamp.seconds, timestamp.nanos.max(0) as u32)
}

fn proto_duration(duration: &Option<protobuf::Duration>) -> Duration {
    match duration {
        Some(d) if d.seconds >= 0 && d.nanos >= 0 => {
            Duration::new(d.seconds as u64, d.nanos as u32)
        }
        _ => Duration::ZERO,
    }
}

/// Human-readable duration with unit suffixes: `0s`, `800ns`, `250µs`,
/// `100ms`, `1.5s`, `1m30s`, `2h0m10s`.
pub fn format_duration(duration: Duration) -> String {
    if duration.is_zero() {
        return "0s".to_string();
    }

    let nanos = duration.as_nanos();
    if nanos < 1_000 {
        return format!("{}ns", nanos);
    }
    if nanos < 1_000_000 {
        return format!("{}µs", trim_fraction(nanos as f64 / 1e3));
    }
    if nanos < 1_000_000_000 {
        return format!("{}ms", trim_fraction(nanos as f64 / 1e6));
    }

    let total_seconds = duration.as_secs();
    let hours = total_seconds / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let seconds = (total_seconds % 60) as f64 + f64::from(duration.subsec_nanos()) / 1e9;

    let mut out = String::new();
    if hours > 0 {
        out.push_str(&format!("{}h", hours));
    }
    if minutes > 0 || hours > 0 {
        out.push_str(&format!("{}m", minutes));
    }
    out.push_str(&format!("{}s", trim_fraction(seconds)));
    out
}

fn trim_fraction(value: f64) -> String {
    let formatted = format!("{:.3}", value);
    formatted.trim_end_matches('0').trim_end_matches('.').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use envoy_types::pb::envoy::config::core::v3::SocketAddress;
    use envoy_types::pb::envoy::data::accesslog::v3::{
        http_access_log_entry::HttpVersion, AccessLogCommon, HttpRequestProperties,
        HttpResponseProperties,
    };
    use envoy_types::pb::envoy::config::core::v3::RequestMethod;
    use envoy_types::pb::google::protobuf::UInt32Value;

    fn sample_entry() -> HttpAccessLogEntry {
        let socket = |ip: &str| Address {
            address: Some(address::Address::SocketAddress(SocketAddress {
                address: ip.to_string(),
                ..Default::default()
            })),
        };

        HttpAccessLogEntry {
            common_properties: Some(AccessLogCommon {
                route_name: "r1".to_string(),
                downstream_remote_address: Some(socket("192.0.2.10")),
                upstream_remote_address: Some(socket("10.0.0.1")),
                // 2020-07-01T00:00:00Z = 2020-07-01T09:00:00+09:00
                start_time: Some(protobuf::Timestamp { seconds: 1_593_561_600, nanos: 0 }),
                time_to_last_rx_byte: Some(protobuf::Duration {
                    seconds: 0,
                    nanos: 100_000_000,
                }),
                time_to_first_upstream_rx_byte: Some(protobuf::Duration {
                    seconds: 1,
                    nanos: 500_000_000,
                }),
                ..Default::default()
            }),
            protocol_version: HttpVersion::Http11 as i32,
            request: Some(HttpRequestProperties {
                request_method: RequestMethod::Get as i32,
                path: "/x".to_string(),
                user_agent: String::new(),
                referer: String::new(),
                ..Default::default()
            }),
            response: Some(HttpResponseProperties {
                response_code: Some(UInt32Value { value: 200 }),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    #[test]
    fn test_record_extraction() {
        let record = AccessLogRecord::from_entry(&sample_entry());
        assert_eq!(record.route, "r1");
        assert_eq!(record.protocol, "HTTP11");
        assert_eq!(record.request_method, "GET");
        assert_eq!(record.response_status, 200);
        assert_eq!(record.client_address, "192.0.2.10");
        assert_eq!(record.remote_address, "10.0.0.1");
        assert_eq!(record.request_receive_duration, Duration::from_millis(100));
        assert_eq!(record.response_receiving_duration, Duration::from_millis(1500));
        assert_eq!(record.client_complete_duration, Duration::ZERO);
    }

    #[test]
    fn test_ltsv_line_fixed_order() {
        let record = AccessLogRecord::from_entry(&sample_entry());
        let mut buf = BytesMut::new();
        record.write_to("L", &mut buf);

        let line = String::from_utf8(buf.to_vec()).unwrap();
        assert!(line.ends_with('\n'));

        let tags: Vec<&str> = line
            .trim_end_matches('\n')
            .split('\t')
            .map(|field| field.split_once(':').unwrap().0)
            .collect();
        assert_eq!(
            tags,
            vec![
                "id", "time", "route", "proto", "method", "status", "path", "ua", "referer",
                "client", "remote", "req.receive", "res.receiving", "res.complete",
                "client.receiving", "client.complete",
            ]
        );

        assert!(line.starts_with("id:L\ttime:2020-07-01 09:00:00.000\troute:r1\tproto:HTTP11\t"));
        assert!(line.contains("method:GET\tstatus:200\tpath:/x\tua:-\treferer:-\t"));
        assert!(line.contains("req.receive:100ms\t"));
        assert!(line.contains("res.receiving:1.5s\t"));
        assert!(line.contains("client.complete:0s\t"));
    }

    #[test]
    fn test_empty_strings_become_dashes() {
        let record = AccessLogRecord::default();
        let mut buf = BytesMut::new();
        record.write_to("", &mut buf);

        let line = String::from_utf8(buf.to_vec()).unwrap();
        assert!(line.starts_with("id:-\t"));
        assert!(line.contains("route:-\t"));
        assert!(line.contains("ua:-\t"));
        // numeric fields render as numbers, never as dashes
        assert!(line.contains("status:0\t"));
        assert!(line.contains("req.receive:0s\t"));
    }

    #[test]
    fn test_missing_start_time_renders_epoch() {
        let record = AccessLogRecord::default();
        let mut buf = BytesMut::new();
        record.write_to("L", &mut buf);
        let line = String::from_utf8(buf.to_vec()).unwrap();
        assert!(line.contains("time:1970-01-01 09:00:00.000\t"));
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::ZERO), "0s");
        assert_eq!(format_duration(Duration::from_nanos(800)), "800ns");
        assert_eq!(format_duration(Duration::from_micros(250)), "250µs");
        assert_eq!(format_duration(Duration::from_micros(1500)), "1.5ms");
        assert_eq!(format_duration(Duration::from_millis(100)), "100ms");
        assert_eq!(format_duration(Duration::from_millis(1500)), "1.5s");
        assert_eq!(format_duration(Duration::from_secs(90)), "1m30s");
        assert_eq!(format_duration(Duration::from_secs(7210)), "2h0m10s");
    }

    #[test]
    fn test_negative_proto_duration_clamps_to_zero() {
        let negative = Some(protobuf::Duration { seconds: -1, nanos: 0 });
        assert_eq!(proto_duration(&negative), Duration::ZERO);
        assert_eq!(proto_duration(&None), Duration::ZERO);
    }
}
