mod common;

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use lostik::command::Command;
use lostik::{CommandChannel, Error, LineTransport, ModemLink, Reader, ResponseToken};

use common::{fast_options, scripted, scripted_without_handle, ModemHandle};

fn channel_for(transport: LineTransport) -> (CommandChannel, Reader) {
    let transport = Arc::new(transport);
    let (reader, events) = Reader::spawn(Arc::clone(&transport)).unwrap();
    (CommandChannel::new(transport, events, fast_options()), reader)
}

fn version_modem() -> (CommandChannel, Reader, ModemHandle) {
    let (transport, handle) = scripted(|line| match line {
        "sys get ver" => vec!["RN2483 1.0.3 Mar 22 2017 14:54:16".to_string()],
        "mac get ch freq 0" => vec!["868100000".to_string()],
        "mac set ch freq 0 868100000" => vec!["invalid_param".to_string()],
        "sys reset" => vec![],
        _ => vec!["ok".to_string()],
    });
    let (channel, reader) = channel_for(transport);
    (channel, reader, handle)
}

#[test]
fn test_send_and_expect_pairs_reply() {
    common::init_logging();
    let (mut channel, _reader, handle) = version_modem();

    let token = channel
        .send_and_expect(&Command::GetVersion, Duration::from_millis(500))
        .unwrap();
    assert_eq!(
        token,
        ResponseToken::VersionInfo("RN2483 1.0.3 Mar 22 2017 14:54:16".to_string())
    );

    let token = channel
        .send_and_expect(
            &Command::GetChannelFrequency { channel: 0 },
            Duration::from_millis(500),
        )
        .unwrap();
    assert_eq!(token, ResponseToken::Value("868100000".to_string()));
    assert_eq!(handle.written(), vec!["sys get ver", "mac get ch freq 0"]);
}

#[test]
fn test_expect_ok_reports_rejection() {
    let (mut channel, _reader, _handle) = version_modem();
    let cmd = Command::SetChannelFrequency {
        channel: 0,
        hz: 868_100_000,
    };
    match channel.expect_ok(&cmd, Duration::from_millis(500)) {
        Err(Error::CommandRejected { command, token }) => {
            assert_eq!(command, "mac set ch freq 0 868100000");
            assert_eq!(token, ResponseToken::InvalidParam);
        }
        other => panic!("unexpected {:?}", other),
    }
    // the channel stays usable
    channel
        .expect_ok(&Command::Save, Duration::from_millis(500))
        .unwrap();
}

#[test]
fn test_silence_is_no_response() {
    let (mut channel, _reader, _handle) = version_modem();
    let result = channel.send_and_expect(&Command::SysReset, Duration::from_millis(50));
    assert!(matches!(
        result,
        Err(Error::NoResponse { ref command, timeout_ms: 50 }) if command == "sys reset"
    ));
}

#[test]
fn test_unsolicited_lines_are_not_taken_as_reply() {
    let (mut channel, _reader, handle) = version_modem();
    handle.emit("radio_err");
    // give the reader thread time to pick it up
    thread::sleep(Duration::from_millis(50));
    let token = channel
        .send_and_expect(&Command::GetVersion, Duration::from_millis(500))
        .unwrap();
    assert!(matches!(token, ResponseToken::VersionInfo(_)));
}

#[test]
fn test_commands_are_spaced() {
    let (mut channel, _reader, _handle) = version_modem();
    let delay = channel.options().command_delay;
    let start = Instant::now();
    for _ in 0..4 {
        channel
            .send(&Command::SetPinDigital {
                pin: lostik::Pin::Gpio10,
                high: true,
            })
            .unwrap();
    }
    assert!(start.elapsed() >= delay * 4);
}

#[test]
fn test_invalid_command_is_not_written() {
    let (mut channel, _reader, handle) = version_modem();
    let result = channel.send(&Command::Raw("sys reset\r\nsys get ver".to_string()));
    assert!(matches!(result, Err(Error::InvalidCommand(_))));
    assert!(handle.written().is_empty());
}

#[test]
fn test_end_of_stream_closes_channel() {
    let (transport, _written) = scripted_without_handle(common::always_ok);
    let (mut channel, mut reader) = channel_for(transport);
    reader.shutdown();
    assert!(channel.is_closed());
    assert!(matches!(
        channel.send_and_expect(&Command::GetVersion, Duration::from_millis(100)),
        Err(Error::Closed)
    ));
    assert!(matches!(channel.send(&Command::Pause), Err(Error::Closed)));
}
