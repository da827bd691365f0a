/// Property tests over the codec, cache, and recolorer, replacing the
/// ad-hoc `create_cache_key`/`calculate_ttl`/`is_cacheable` helpers from
/// an earlier cut of this proxy with properties over the real public API.
use std::time::Duration;

use bytes::Bytes;
use proptest::prelude::*;

use rustysquid::cache::Cache;
use rustysquid::http::{self, Response};
use rustysquid::recolor::recolor_links;

fn resp(body: &str, max_age: Duration) -> Response {
    let raw = Bytes::from(format!(
        "HTTP/1.1 200 OK\r\nContent-Length: {}\r\n\r\n{}",
        body.len(),
        body
    ));
    Response {
        version: "HTTP/1.1".into(),
        status_line: "HTTP/1.1 200 OK".into(),
        cache_control: None,
        max_age,
        content_length: Some(body.len()),
        body: Bytes::from(body.to_string()),
        raw,
    }
}

proptest! {
    // A request's cache key is exactly `host || path`, independent of the
    // request's scheme or declared port.
    #[test]
    fn prop_cache_key_is_host_concat_path(
        host in "[a-z]{3,10}\\.(com|org|net)",
        path in "/[a-z0-9/]{0,40}"
    ) {
        let raw = format!("GET http://{host}{path} HTTP/1.1\r\nHost: {host}\r\n\r\n");
        let req = http::parse_request(raw.as_bytes()).unwrap();
        prop_assert_eq!(req.cache_key(), format!("{host}{path}"));
    }

    // Parsing the same bytes twice yields the same key: no hidden clock or
    // randomness in the codec.
    #[test]
    fn prop_cache_key_deterministic(
        host in "[a-z]{3,10}\\.(com|org|net)",
        path in "/[a-z0-9/]{0,40}"
    ) {
        let raw = format!("GET http://{host}{path} HTTP/1.1\r\nHost: {host}\r\n\r\n");
        let k1 = http::parse_request(raw.as_bytes()).unwrap().cache_key();
        let k2 = http::parse_request(raw.as_bytes()).unwrap().cache_key();
        prop_assert_eq!(k1, k2);
    }

    // Distinct hosts never collide on the same path.
    #[test]
    fn prop_cache_key_distinguishes_hosts(
        host1 in "[a-z]{3,10}\\.(com|org|net)",
        host2 in "[a-z]{3,10}\\.(com|org|net)",
        path in "/[a-z0-9/]{0,40}"
    ) {
        prop_assume!(host1 != host2);
        let r1 = format!("GET http://{host1}{path} HTTP/1.1\r\nHost: {host1}\r\n\r\n");
        let r2 = format!("GET http://{host2}{path} HTTP/1.1\r\nHost: {host2}\r\n\r\n");
        let k1 = http::parse_request(r1.as_bytes()).unwrap().cache_key();
        let k2 = http::parse_request(r2.as_bytes()).unwrap().cache_key();
        prop_assert_ne!(k1, k2);
    }

    // `max-age` parses back out verbatim for any value libcurl-style headers
    // would plausibly carry.
    #[test]
    fn prop_max_age_roundtrips(seconds in 0u64..1_000_000u64) {
        let header = format!("max-age={seconds}");
        let parsed = http::parse_max_age(&header);
        prop_assert_eq!(parsed, Some(Duration::from_secs(seconds)));
    }

    // Absent or unparsable `Cache-Control` never panics and never yields a
    // max-age larger than what was requested.
    #[test]
    fn prop_max_age_missing_directive_is_none(word in "[a-z-]{1,20}") {
        prop_assume!(!word.contains("max-age"));
        prop_assert_eq!(http::parse_max_age(&word), None);
    }

    // `add_field` is idempotent: replacing a header with the same value it
    // already holds leaves the buffer length-stable across repeated calls.
    #[test]
    fn prop_add_field_is_idempotent(value in "[0-9]{1,5}") {
        let base = Bytes::from_static(b"HTTP/1.1 200 OK\r\nContent-Length: 3\r\n\r\nabc");
        let once = http::add_field(&base, "Age", &value).unwrap();
        let twice = http::add_field(&once, "Age", &value).unwrap();
        prop_assert_eq!(once, twice);
    }

    // A perfect-prefix href whose stored key is scheme-less always recolors
    // green; any href under a host absent from the live set always recolors
    // red.
    #[test]
    fn prop_recolor_marks_exactly_the_live_keys_green(
        host in "[a-z]{3,10}\\.(com|org|net)",
        path in "/[a-z0-9]{1,10}",
        other_host in "[a-z]{3,10}\\.(io|dev)"
    ) {
        prop_assume!(host != other_host);
        let key = format!("{host}{path}");
        let body = format!(
            r#"<a href="http://{host}{path}">x</a><a href="http://{other_host}/z">y</a>"#
        );
        let out = recolor_links(&body, &[key.as_str()]);
        prop_assert!(out.contains("color:#00FF00") , "live href should be green: {out}");
        prop_assert!(out.contains("color:#FF0000"), "unrelated href should be red: {out}");
    }
}

#[test]
fn cache_put_then_get_round_trips_body_for_any_capacity() {
    for capacity in [1usize, 2, 8, 64] {
        let mut cache = Cache::new(capacity);
        let key = "h/p".to_string();
        cache.put(key.clone(), resp("payload", Duration::from_secs(60)), Duration::from_secs(60));
        let got = cache.get(&key).expect("just-inserted key must hit");
        assert_eq!(&got.body[..], b"payload");
    }
}

#[test]
fn cache_never_exceeds_its_configured_capacity() {
    let capacity = 8;
    let mut cache = Cache::new(capacity);
    for i in 0..100 {
        let key = format!("host{i}.example/p");
        cache.put(key, resp("x", Duration::from_secs(3600)), Duration::from_secs(3600));
        assert!(cache.len() <= capacity);
    }
}

#[tokio::test]
async fn cache_handles_concurrent_readers_and_writers() {
    use std::sync::Arc;
    use tokio::sync::Mutex;
    use tokio::task;

    let cache = Arc::new(Mutex::new(Cache::new(64)));
    let mut handles = vec![];

    for i in 0..10 {
        let cache = cache.clone();
        handles.push(task::spawn(async move {
            let key = format!("test{i}.example/p");
            let value = resp(&format!("body{i}"), Duration::from_secs(60));
            cache.lock().await.put(key.clone(), value.clone(), Duration::from_secs(60));
            let got = cache.lock().await.get(&key).expect("own write must be visible");
            assert_eq!(got.body, value.body);
        }));
    }

    for handle in handles {
        handle.await.unwrap();
    }

    assert!(cache.lock().await.len() >= 10);
}
