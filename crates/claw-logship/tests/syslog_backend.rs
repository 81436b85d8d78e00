//! Integration tests for the syslog backend against a local UDP collector.

mod common;

use claw_logship::{
    Backend, ErrorClass, IndexerConfig, ShippingWriter, SyslogConfig, SyslogFormat,
};
use common::{build, host, network, SyslogCollector};

fn writer_for(collector: &SyslogCollector, format: SyslogFormat) -> ShippingWriter {
    let config = IndexerConfig::Syslog(
        SyslogConfig::new("127.0.0.1", collector.port()).with_format(format),
    );
    ShippingWriter::new(build(), config, network(), host())
}

fn json_body(datagram: &str, separator: &str) -> serde_json::Value {
    let (_, body) = datagram
        .split_once(separator)
        .expect("datagram has a header");
    serde_json::from_str(body).expect("body is the JSON payload")
}

#[test]
fn test_rfc3164_datagram() {
    let collector = SyslogCollector::bind();
    let mut writer = writer_for(&collector, SyslogFormat::Rfc3164);

    writer.write("compiling crate");
    assert!(!writer.is_broken());

    let datagram = collector.receive();
    assert!(datagram.starts_with("<14>"), "{datagram}");
    assert!(datagram.contains(" agent-1 build-system: {"), "{datagram}");

    let payload = json_body(&datagram, "build-system: ");
    assert_eq!(payload["message"][0], "compiling crate");
    assert_eq!(payload["data"]["buildNum"], 42);
}

#[test]
fn test_rfc5424_datagram() {
    let collector = SyslogCollector::bind();
    let mut writer = writer_for(&collector, SyslogFormat::Rfc5424);

    writer.write("linking");

    let datagram = collector.receive();
    assert!(datagram.starts_with("<14>1 "), "{datagram}");
    let payload = json_body(&datagram, " - - - ");
    assert_eq!(payload["message"][0], "linking");
}

#[test]
fn test_datagrams_arrive_in_write_order() {
    let collector = SyslogCollector::bind();
    let mut writer = writer_for(&collector, SyslogFormat::Rfc3164);

    for line in ["one", "two", "three"] {
        writer.write(line);
    }

    let received: Vec<String> = (0..3)
        .map(|_| json_body(&collector.receive(), "build-system: ")["message"][0].to_string())
        .collect();
    assert_eq!(received, vec!["\"one\"", "\"two\"", "\"three\""]);
}

#[test]
fn test_syslog_pull_is_unsupported() {
    let config = IndexerConfig::Syslog(SyslogConfig::new("127.0.0.1", 514));
    let backend = Backend::from_config(&config, &network()).expect("valid config");

    let err = backend.pull(&build(), 0, i64::MAX).expect_err("push only");
    assert_eq!(err.class(), ErrorClass::UnsupportedOperation);
}
