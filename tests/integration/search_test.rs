// tests/integration/search_test.rs

//! Search execution: request rewriting, terminal outcome classification and
//! normalization of the returned records.

use super::test_helpers::*;
use dirconn::config::Config;
use dirconn::core::errors::{DirError, RC_NO_SUCH_OBJECT, RC_SIZE_LIMIT_EXCEEDED};
use dirconn::core::transport::{DerefAliases, Scope, SearchEvent};
use dirconn::core::{AttrValue, ConnectionState, SearchOptions, as_array, first_value};

const NO_ATTRIBUTES: [&str; 0] = [];

#[tokio::test]
async fn test_search_end_to_end_with_bind() {
    let ctx = TestContext::with_bind();
    ctx.script_search(vec![
        SearchEvent::Entry(
            entry("uid=alice")
                .with_attr("displayName", "Alice")
                .with_attr("objectClass", ["top", "person"]),
        ),
        done(),
    ]);

    let records = ctx
        .client
        .search(
            TEST_BASE,
            "(mail=a@example.org)",
            &["displayName", "objectClass"],
            SearchOptions::default(),
        )
        .await
        .unwrap();

    assert_eq!(records.len(), 1);
    let alice = &records[0];
    assert_eq!(alice.dn, format!("uid=alice,{TEST_BASE}"));
    assert_eq!(first_value(&alice.value("displayName")), Some("Alice"));
    assert_eq!(alice.first("displayName"), Some("Alice"));
    assert_eq!(as_array(&alice.value("objectClass")), vec!["top", "person"]);
    assert_eq!(ctx.binds(), 1);
}

#[tokio::test]
async fn test_search_raw_keeps_raw_shapes() {
    let ctx = TestContext::new();
    ctx.script_search(vec![
        SearchEvent::Entry(
            entry("uid=alice")
                .with_attr("displayName", "Alice")
                .with_attr("objectClass", ["top", "person"]),
        ),
        done(),
    ]);

    let entries = ctx
        .client
        .search_raw(TEST_BASE, "(uid=alice)", &["displayName"], SearchOptions::default())
        .await
        .unwrap();

    assert_eq!(entries.len(), 1);
    assert_eq!(
        entries[0].get("displayName"),
        &AttrValue::Scalar("Alice".to_string())
    );
    assert!(entries[0].get("mail").is_absent());
}

#[tokio::test]
async fn test_normalized_record_includes_every_requested_attribute() {
    let ctx = TestContext::new();
    ctx.script_search(vec![
        SearchEvent::Entry(entry("uid=bob").with_attr("cn", "Bob")),
        done(),
    ]);

    let records = ctx
        .client
        .search(TEST_BASE, "(uid=bob)", &["cn", "mail"], SearchOptions::default())
        .await
        .unwrap();

    assert_eq!(records[0].all("cn").to_vec(), vec!["Bob".to_string()]);
    assert!(records[0].all("mail").is_empty());
    assert!(records[0].attrs.contains_key("mail"));
    assert_eq!(records[0].first("mail"), None);
}

#[tokio::test]
async fn test_empty_attribute_list_requests_object_class() {
    let ctx = TestContext::new();
    ctx.script_search(vec![done()]);

    ctx.client
        .search_raw(TEST_BASE, "(uid=alice)", &NO_ATTRIBUTES, SearchOptions::default())
        .await
        .unwrap();

    let (_, request) = ctx.last_search();
    assert_eq!(request.attributes, vec!["objectClass".to_string()]);
}

#[tokio::test]
async fn test_match_nothing_filter_skips_the_server() {
    let ctx = TestContext::new();
    let entries = ctx
        .client
        .search_raw(TEST_BASE, "(|)", &["cn"], SearchOptions::default())
        .await
        .unwrap();
    assert!(entries.is_empty());
    assert_eq!(ctx.connects(), 0);
    assert!(ctx.mock.searches.lock().is_empty());
}

#[tokio::test]
async fn test_match_nothing_filter_needs_no_configuration() {
    let ctx = TestContext::unconfigured();
    let records = ctx
        .client
        .search(TEST_BASE, "(|)", &["cn"], SearchOptions::default())
        .await
        .unwrap();
    assert!(records.is_empty());
}

#[tokio::test]
async fn test_search_before_configure_fails() {
    let ctx = TestContext::unconfigured();
    let err = ctx
        .client
        .search(TEST_BASE, "(uid=alice)", &["cn"], SearchOptions::default())
        .await
        .unwrap_err();
    assert_eq!(err, DirError::NotConfigured);
}

#[tokio::test]
async fn test_invalid_filter_fails_without_contacting_server() {
    let ctx = TestContext::new();
    let err = ctx
        .client
        .search_raw(TEST_BASE, "(cn=alice", &["cn"], SearchOptions::default())
        .await
        .unwrap_err();

    assert!(matches!(err, DirError::FilterSyntax(_)));
    assert!(err.to_string().starts_with("Error parsing LDAP filter: "));
    assert_eq!(ctx.connects(), 0);
}

#[tokio::test]
async fn test_filter_is_sent_parsed() {
    let ctx = TestContext::new();
    ctx.script_search(vec![done()]);

    ctx.client
        .search_raw(TEST_BASE, " (&(objectClass=person)(cn=Al*)) ", &["cn"], SearchOptions::default())
        .await
        .unwrap();

    let (_, request) = ctx.last_search();
    assert_eq!(request.filter.to_string(), "(&(objectClass=person)(cn=Al*))");
}

#[tokio::test]
async fn test_empty_filter_matches_everything() {
    let ctx = TestContext::new();
    ctx.script_search(vec![done()]);

    ctx.client
        .search_raw(TEST_BASE, "", &["cn"], SearchOptions::default())
        .await
        .unwrap();

    let (_, request) = ctx.last_search();
    assert_eq!(request.filter.to_string(), "(objectClass=*)");
}

#[tokio::test]
async fn test_default_options_use_subtree_scope() {
    let ctx = TestContext::new();
    ctx.script_search(vec![done()]);

    ctx.client
        .search_raw(TEST_BASE, "(cn=x)", &["cn"], SearchOptions::default())
        .await
        .unwrap();

    let (_, request) = ctx.last_search();
    assert_eq!(request.base, TEST_BASE);
    assert_eq!(request.scope, Scope::Sub);
    assert_eq!(request.size_limit, None);
    assert_eq!(request.deref, DerefAliases::Never);
    assert!(!request.types_only);
}

#[tokio::test]
async fn test_caller_options_win_over_defaults() {
    let ctx = TestContext::new();
    ctx.script_search(vec![done()]);

    let options = SearchOptions::default()
        .scope(Scope::Base)
        .size_limit(10)
        .time_limit(5)
        .deref(DerefAliases::Always);
    ctx.client
        .search_raw(TEST_BASE, "(cn=x)", &["cn"], options)
        .await
        .unwrap();

    let (_, request) = ctx.last_search();
    assert_eq!(request.scope, Scope::Base);
    assert_eq!(request.size_limit, Some(10));
    assert_eq!(request.time_limit, Some(5));
    assert_eq!(request.deref, DerefAliases::Always);
}

#[tokio::test]
async fn test_size_limit_error_returns_partial_entries() {
    let ctx = TestContext::new();
    ctx.script_search(vec![
        SearchEvent::Entry(entry("uid=a")),
        SearchEvent::Entry(entry("uid=b")),
        SearchEvent::Error(DirError::Search {
            rc: RC_SIZE_LIMIT_EXCEEDED,
            text: "Size limit exceeded".into(),
        }),
        SearchEvent::Entry(entry("uid=never")),
    ]);

    let entries = ctx
        .client
        .search_raw(TEST_BASE, "(uid=*)", &["uid"], SearchOptions::default())
        .await
        .unwrap();

    let dns: Vec<&str> = entries.iter().map(|e| e.dn.as_str()).collect();
    assert_eq!(dns, vec![format!("uid=a,{TEST_BASE}"), format!("uid=b,{TEST_BASE}")]);
}

#[tokio::test]
async fn test_size_limit_result_code_returns_partial_entries() {
    let ctx = TestContext::new();
    ctx.script_search(vec![
        SearchEvent::Entry(entry("uid=a")),
        SearchEvent::Done {
            rc: RC_SIZE_LIMIT_EXCEEDED,
            text: String::new(),
        },
    ]);

    let entries = ctx
        .client
        .search(TEST_BASE, "(uid=*)", &["uid"], SearchOptions::default().size_limit(1))
        .await
        .unwrap();
    assert_eq!(entries.len(), 1);
}

#[tokio::test]
async fn test_protocol_error_discards_partial_entries() {
    let ctx = TestContext::new();
    let failure = DirError::Transport("connection reset".into());
    ctx.script_search(vec![
        SearchEvent::Entry(entry("uid=a")),
        SearchEvent::Error(failure.clone()),
    ]);

    let err = ctx
        .client
        .search_raw(TEST_BASE, "(uid=*)", &["uid"], SearchOptions::default())
        .await
        .unwrap_err();
    assert_eq!(err, failure);
}

#[tokio::test]
async fn test_non_success_end_status_fails() {
    let ctx = TestContext::new();
    ctx.script_search(vec![SearchEvent::Done {
        rc: RC_NO_SUCH_OBJECT,
        text: "no such object".into(),
    }]);

    let err = ctx
        .client
        .search_raw("ou=missing,dc=example,dc=org", "(uid=*)", &["uid"], SearchOptions::default())
        .await
        .unwrap_err();
    assert_eq!(
        err,
        DirError::Search {
            rc: RC_NO_SUCH_OBJECT,
            text: "no such object".into()
        }
    );
}

#[tokio::test]
async fn test_referrals_do_not_contribute_entries() {
    let ctx = TestContext::with_config(Config::new(TEST_URI).with_verbose(true));
    ctx.script_search(vec![
        SearchEvent::Referral(vec!["ldap://other.example.org/dc=other".into()]),
        SearchEvent::Entry(entry("uid=a")),
        done(),
    ]);

    let entries = ctx
        .client
        .search_raw(TEST_BASE, "(uid=*)", &["uid"], SearchOptions::default())
        .await
        .unwrap();
    assert_eq!(entries.len(), 1);
}

#[tokio::test]
async fn test_stream_without_final_result_fails() {
    let ctx = TestContext::new();
    ctx.script_search(vec![SearchEvent::Entry(entry("uid=a"))]);

    let err = ctx
        .client
        .search_raw(TEST_BASE, "(uid=*)", &["uid"], SearchOptions::default())
        .await
        .unwrap_err();
    assert_eq!(err, DirError::ConnectionClosed);
}

#[tokio::test]
async fn test_closed_session_drops_cached_connection() {
    let ctx = TestContext::new();
    ctx.script_search(vec![SearchEvent::Entry(entry("uid=a")), done()]);
    ctx.client
        .search(TEST_BASE, "(uid=a)", &["uid"], SearchOptions::default())
        .await
        .unwrap();

    // The server went away without the transport noticing.
    ctx.kill_session(1);
    let err = ctx
        .client
        .search(TEST_BASE, "(uid=a)", &["uid"], SearchOptions::default())
        .await
        .unwrap_err();
    assert_eq!(err, DirError::ConnectionClosed);
    assert_eq!(ctx.client.state(), ConnectionState::Disconnected);
    assert_eq!(ctx.closes(), 1);

    let records = ctx
        .client
        .search(TEST_BASE, "(uid=a)", &["uid"], SearchOptions::default())
        .await
        .unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(ctx.connects(), 2);
    assert_eq!(ctx.last_search().0, 2);
}

#[tokio::test]
async fn test_search_failure_keeps_cached_connection() {
    let ctx = TestContext::new();
    ctx.script_search(vec![SearchEvent::Done {
        rc: RC_NO_SUCH_OBJECT,
        text: "No Such Object".into(),
    }]);
    assert!(
        ctx.client
            .search(TEST_BASE, "(uid=a)", &["uid"], SearchOptions::default())
            .await
            .is_err()
    );
    assert_eq!(ctx.client.state(), ConnectionState::Ready);
    assert_eq!(ctx.closes(), 0);
}

#[tokio::test]
async fn test_force_reconnect_then_search_uses_new_connection() {
    let ctx = TestContext::new();
    ctx.script_search(vec![SearchEvent::Entry(entry("uid=a")), done()]);

    ctx.client
        .search(TEST_BASE, "(uid=a)", &["uid"], SearchOptions::default())
        .await
        .unwrap();
    assert_eq!(ctx.last_search().0, 1);

    ctx.client.force_reconnect().unwrap();
    let records = ctx
        .client
        .search(TEST_BASE, "(uid=a)", &["uid"], SearchOptions::default())
        .await
        .unwrap();

    assert_eq!(records.len(), 1);
    assert_eq!(ctx.last_search().0, 2);
    assert_eq!(ctx.connects(), 2);
}

#[tokio::test]
async fn test_search_after_idle_reconnects_transparently() {
    let ctx = TestContext::new();
    ctx.script_search(vec![SearchEvent::Entry(entry("uid=a")), done()]);

    ctx.client
        .search(TEST_BASE, "(uid=a)", &["uid"], SearchOptions::default())
        .await
        .unwrap();
    ctx.emit(dirconn::core::transport::TransportEvent::Idle);
    ctx.wait_for_state(dirconn::core::ConnectionState::Disconnected)
        .await;

    let records = ctx
        .client
        .search(TEST_BASE, "(uid=a)", &["uid"], SearchOptions::default())
        .await
        .unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(ctx.connects(), 2);
    assert_eq!(ctx.last_search().0, 2);
}
