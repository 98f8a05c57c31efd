mod common;

use std::time::Duration;

use lostik::command::Uplink;
use lostik::config::{JoinConfig, JoinMode, OtaaCredentials};
use lostik::{ConnectionState, Error, LoStik};

fn bare_otaa() -> JoinConfig {
    JoinConfig::new(JoinMode::Otaa(OtaaCredentials::default()))
        .with_attempt_timeout(Duration::from_secs(2))
}

/// Replies for the n-th `mac join`, every other command gets `ok`.
fn join_script(verdicts: Vec<Vec<&'static str>>) -> impl FnMut(&str) -> Vec<String> + Send {
    let mut joins = 0;
    move |line: &str| {
        if line.starts_with("mac join") {
            let replies = verdicts.get(joins).cloned().unwrap_or_default();
            joins += 1;
            replies.into_iter().map(String::from).collect()
        } else {
            vec!["ok".to_string()]
        }
    }
}

#[test]
fn test_join_after_two_refusals() {
    common::init_logging();
    let (mut stick, handle) = common::lostik(join_script(vec![
        vec!["busy", "denied"],
        vec!["denied"],
        vec!["accepted"],
    ]));

    let mut session = stick.join_session(bare_otaa()).unwrap();
    session.run().unwrap();
    assert_eq!(*session.state(), ConnectionState::Connected);
    assert_eq!(session.attempts_issued(), 3);

    let joins = handle
        .written()
        .into_iter()
        .filter(|l| l == "mac join otaa")
        .count();
    assert_eq!(joins, 3);
}

#[test]
fn test_join_gives_up_at_ceiling() {
    let (mut stick, handle) = common::lostik(join_script(vec![vec!["denied"]; 5]));
    let result = stick.join(bare_otaa().with_max_retries(2));
    assert!(matches!(result, Err(Error::MaxRetriesExceeded { attempts: 2 })));
    assert_eq!(handle.written(), vec!["mac join otaa", "mac join otaa"]);
}

#[test]
fn test_credentials_precede_every_join() {
    let (mut stick, handle) =
        common::lostik(join_script(vec![vec!["no_free_ch"], vec!["accepted"]]));
    let config = JoinConfig::new(JoinMode::Otaa(OtaaCredentials {
        dev_eui: "0004A30B001A2B3C".to_string(),
        ..Default::default()
    }));
    stick.join(config).unwrap();
    assert_eq!(
        handle.written(),
        vec![
            "mac set deveui 0004A30B001A2B3C",
            "mac join otaa",
            "mac set deveui 0004A30B001A2B3C",
            "mac join otaa"
        ]
    );
}

#[test]
fn test_silent_attempt_times_out_and_retries() {
    let (mut stick, handle) = common::lostik(join_script(vec![vec![], vec!["accepted"]]));
    let config = bare_otaa().with_attempt_timeout(Duration::from_millis(100));
    stick.join(config).unwrap();
    assert_eq!(handle.written().len(), 2);
}

#[test]
fn test_uplink_requires_connection() {
    let (mut stick, handle) = common::lostik(join_script(vec![vec!["accepted"]]));
    let mut session = stick.join_session(bare_otaa()).unwrap();
    assert!(matches!(
        session.transmit(Uplink::Unconfirmed, 1, b"hi"),
        Err(Error::NotConnected)
    ));

    session.run().unwrap();
    session.transmit(Uplink::Unconfirmed, 1, b"hi").unwrap();
    assert_eq!(
        handle.written().last().map(String::as_str),
        Some("mac tx uncnf 1 6869")
    );
}

#[test]
fn test_closed_link_fails_session() {
    let (mut stick, _handle) = common::lostik(join_script(vec![vec![]]));
    stick.close();
    let mut session = stick.join_session(bare_otaa()).unwrap();
    assert!(session.run().is_err());
    assert!(matches!(session.state(), ConnectionState::Failed(_)));
}

#[test]
fn test_write_failure_mid_join_is_failed() {
    // the first `mac join` goes out, the retry after `denied` hits a dead port
    let (transport, handle) = common::scripted_with(join_script(vec![vec!["denied"]]), Some(1));
    let mut stick = LoStik::from_transport(transport, common::fast_options()).unwrap();
    let mut session = stick.join_session(bare_otaa()).unwrap();

    assert!(matches!(session.run(), Err(Error::Write(_))));
    assert!(matches!(session.state(), ConnectionState::Failed(_)));
    assert_eq!(handle.written(), vec!["mac join otaa"]);
}

#[test]
fn test_read_failure_mid_join_is_failed() {
    let (mut stick, handle) = common::lostik(join_script(vec![vec![]]));
    let mut session = stick.join_session(bare_otaa()).unwrap();
    session.start_join().unwrap();
    handle.fail_read("unplugged");

    match session.run() {
        Err(Error::Read(e)) => assert_eq!(e.to_string(), "unplugged"),
        other => panic!("unexpected {:?}", other),
    }
    assert!(matches!(session.state(), ConnectionState::Failed(_)));
}
