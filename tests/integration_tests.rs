/// End-to-end-ish tests across the codec, cache, and recolorer: a cache
/// miss followed by a hit, stale eviction under a tight capacity, and
/// cache-state link recoloring. These drive the public module API
/// directly rather than a live listener, since the proxy loop itself
/// needs a real socket pair to exercise meaningfully (see
/// `tests/connection_limit_test.rs` for that style of test).
use std::thread::sleep;
use std::time::Duration;

use rustysquid::cache::Cache;
use rustysquid::http::{self, Method, Response};
use rustysquid::query::clone_response_for_cache;
use rustysquid::recolor::recolor_links;

#[test]
fn cache_miss_then_hit_delivers_identical_body_plus_age() {
    let mut cache = Cache::new(16);

    let req = http::parse_request(b"GET http://example.com/a HTTP/1.1\r\nHost: example.com\r\n\r\n").unwrap();
    assert_eq!(req.method, Method::Get);
    let key = req.cache_key();
    assert_eq!(key, "example.com/a");

    let upstream_response =
        http::parse_response(b"HTTP/1.1 200 OK\r\nContent-Length: 5\r\nCache-Control: max-age=60\r\n\r\nHELLO").unwrap();

    assert!(cache.get(&key).is_none());
    cache.put(key.clone(), clone_response_for_cache(&upstream_response), upstream_response.max_age);

    let hit = cache.get(&key).expect("second request should hit");
    assert_eq!(&hit.body[..], b"HELLO");

    let age = cache.get_age(&key).unwrap();
    let with_age = http::add_field(&hit.raw, "Age", &age.as_secs().to_string()).unwrap();
    assert!(with_age.starts_with(b"HTTP/1.1 200 OK\r\nAge: 0\r\n"));
}

fn resp(body: &'static str, max_age: Duration) -> Response {
    Response {
        version: "HTTP/1.1".into(),
        status_line: "HTTP/1.1 200 OK".into(),
        cache_control: None,
        max_age,
        content_length: Some(body.len()),
        body: bytes::Bytes::from_static(body.as_bytes()),
        raw: bytes::Bytes::from_static(b"HTTP/1.1 200 OK\r\n\r\n"),
    }
}

#[test]
fn stale_eviction_keeps_the_older_fresh_entry_over_the_newly_stale_one() {
    let mut cache = Cache::new(2);

    cache.put("a".into(), resp("A", Duration::from_secs(1)), Duration::from_secs(1));
    cache.put("b".into(), resp("B", Duration::from_secs(1000)), Duration::from_secs(1000));
    sleep(Duration::from_secs(2));
    cache.put("c".into(), resp("C", Duration::from_secs(1000)), Duration::from_secs(1000));

    assert!(cache.get("a").is_none(), "a was stale and should have been evicted first");
    assert!(cache.get("b").is_some(), "b outlives a despite being older by recency");
    assert!(cache.get("c").is_some());
}

#[test]
fn recoloring_marks_cached_link_green_and_other_link_red() {
    let mut cache = Cache::new(4);
    cache.put("example.com/a".into(), resp("", Duration::from_secs(60)), Duration::from_secs(60));

    let body = r#"<a href="http://example.com/a">x</a><a href="http://other/b">y</a>"#;
    let keys = cache.key_list();
    let out = recolor_links(body, &keys);

    assert_eq!(
        out,
        r#"<a style="color:#00FF00;" href="http://example.com/a">x</a><a style="color:#FF0000;" href="http://other/b">y</a>"#
    );
}

#[test]
fn connect_target_is_authority_form_not_a_cache_key() {
    let req = http::parse_request(b"CONNECT example.com:443 HTTP/1.1\r\n\r\n").unwrap();
    assert_eq!(req.method, Method::Connect);
    assert_eq!(req.path(), "example.com:443");
}
