use promenade::Registry;

// One registry with all four kinds, checked against the exact exposition
// bytes. Families appear in registration order, children in creation order,
// and a second collection with no intervening mutation is byte-identical.
#[test]
fn test_full_exposition() {
    let registry = Registry::new();

    let requests = registry
        .counter("requests_total", "Total requests.")
        .label_names(["method"])
        .build()
        .unwrap();
    let get = requests.with_labels(["GET"]).unwrap();
    get.inc();
    get.inc();
    requests.with_labels(["POST"]).unwrap().inc();

    let depth = registry.gauge("queue_depth", "Depth of the work queue.").build().unwrap();
    depth.set(7.5);

    let duration = registry
        .histogram("request_duration_seconds", "Request latency in seconds.")
        .buckets(vec![0.5, 1.0])
        .build()
        .unwrap();
    duration.observe(0.25);
    duration.observe(0.75);
    duration.observe(3.0);

    let payload = registry
        .summary("payload_bytes", "Payload sizes in bytes.")
        .objective(0.5, 0.05)
        .objective(0.99, 0.001)
        .build()
        .unwrap();
    payload.observe(128.0);
    payload.observe(256.0);

    let expected = concat!(
        "# HELP requests_total Total requests.\n",
        "# TYPE requests_total counter\n",
        "requests_total{method=\"GET\"} 2\n",
        "requests_total{method=\"POST\"} 1\n",
        "# HELP queue_depth Depth of the work queue.\n",
        "# TYPE queue_depth gauge\n",
        "queue_depth 7.5\n",
        "# HELP request_duration_seconds Request latency in seconds.\n",
        "# TYPE request_duration_seconds histogram\n",
        "request_duration_seconds_sum 4\n",
        "request_duration_seconds_count 3\n",
        "request_duration_seconds_bucket{le=\"0.5\"} 1\n",
        "request_duration_seconds_bucket{le=\"1\"} 2\n",
        "request_duration_seconds_bucket{le=\"+Inf\"} 3\n",
        "# HELP payload_bytes Payload sizes in bytes.\n",
        "# TYPE payload_bytes summary\n",
        "payload_bytes_sum 384\n",
        "payload_bytes_count 2\n",
        "payload_bytes{quantile=\"0.5\"} 256\n",
        "payload_bytes{quantile=\"0.99\"} 256\n",
    );

    let first = registry.render().unwrap();
    assert_eq!(first, expected);

    let second = registry.render().unwrap();
    assert_eq!(second, first, "idle collections must be byte-identical");
}

// Every emitted line must be parseable under the text format: a comment
// line, or `identifier value` where the value is a valid f64 rendering.
#[test]
fn test_exposition_is_machine_parseable() {
    let registry = Registry::new();
    registry
        .counter("escaped_total", "Counts.")
        .label_names(["path"])
        .build()
        .unwrap()
        .with_labels(["C:\\temp\\\"logs\"\nline"])
        .unwrap()
        .inc();
    registry.gauge("negative", "A negative gauge.").build().unwrap().set(-0.0625);

    let rendered = registry.render().unwrap();
    for line in rendered.lines() {
        if line.starts_with("# HELP ") || line.starts_with("# TYPE ") {
            continue;
        }
        let (identifier, value) =
            line.rsplit_once(' ').unwrap_or_else(|| panic!("malformed line {line:?}"));
        assert!(!identifier.is_empty(), "empty identifier in {line:?}");
        value
            .parse::<f64>()
            .unwrap_or_else(|_| panic!("unparseable value {value:?} in {line:?}"));
    }

    assert!(
        rendered.contains("escaped_total{path=\"C:\\\\temp\\\\\\\"logs\\\"\\nline\"} 1\n"),
        "escaping mangled: {rendered:?}"
    );
}

#[test]
fn test_collect_into_custom_sink() {
    let registry = Registry::new();
    registry.counter("sunk_total", "Counts.").build().unwrap().inc();

    let mut sink = Vec::new();
    registry.collect_and_serialize(&mut sink).unwrap();
    let first = String::from_utf8(sink).unwrap();
    assert!(first.contains("sunk_total 1\n"));

    // The serializer appends and never truncates the sink.
    let mut sink = b"already here\n".to_vec();
    registry.collect_and_serialize(&mut sink).unwrap();
    assert!(sink.starts_with(b"already here\n"));
}
