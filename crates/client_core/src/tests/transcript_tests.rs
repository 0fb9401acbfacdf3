use super::*;
use chrono::{Duration, TimeZone};
use shared::domain::AccountId;

const ME: AccountId = AccountId(1);
const PEER: AccountId = AccountId(2);

fn peer() -> AccountSummary {
    AccountSummary {
        id: PEER,
        username: "bob".into(),
    }
}

fn base() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).single().expect("valid time")
}

fn at(from: AccountId, offset_secs: i64, content: &str) -> ChatMessage {
    let to = if from == ME { PEER } else { ME };
    ChatMessage {
        id: MessageId::at(base() + Duration::seconds(offset_secs)),
        from,
        to,
        content: content.into(),
    }
}

fn contents(transcript: &Transcript) -> Vec<Vec<&str>> {
    transcript
        .blocks()
        .map(|b| b.contents.iter().map(String::as_str).collect())
        .collect()
}

#[test]
fn same_side_within_window_coalesces() {
    let mut transcript = Transcript::new(peer());
    transcript.push_message(&at(ME, 0, "a"), true);
    let outcome = transcript.push_message(&at(ME, 10, "b"), true);

    assert_eq!(outcome, PushOutcome::Coalesced { block: 0 });
    assert_eq!(contents(&transcript), vec![vec!["a", "b"]]);
    assert_eq!(transcript.blocks().next().map(|b| b.side), Some(Side::Sent));
}

#[test]
fn same_side_outside_window_opens_new_block() {
    let mut transcript = Transcript::new(peer());
    transcript.push_message(&at(ME, 0, "a"), true);
    let outcome = transcript.push_message(&at(ME, 90, "b"), true);

    assert_eq!(outcome, PushOutcome::Inserted { block: 1 });
    assert_eq!(contents(&transcript), vec![vec!["a"], vec!["b"]]);
}

#[test]
fn window_is_measured_from_block_start() {
    let mut transcript = Transcript::new(peer());
    transcript.push_message(&at(ME, 0, "a"), true);
    transcript.push_message(&at(ME, 50, "b"), true);
    transcript.push_message(&at(ME, 60, "c"), true);

    assert_eq!(contents(&transcript), vec![vec!["a", "b"], vec!["c"]]);
}

#[test]
fn other_side_always_opens_new_block() {
    let mut transcript = Transcript::new(peer());
    transcript.push_message(&at(ME, 0, "hi"), true);
    transcript.push_message(&at(PEER, 5, "hey"), true);
    transcript.push_message(&at(ME, 8, "sup"), true);

    let sides: Vec<_> = transcript.blocks().map(|b| b.side).collect();
    assert_eq!(sides, vec![Side::Sent, Side::Received, Side::Sent]);
}

#[test]
fn late_message_is_inserted_in_timestamp_order() {
    let mut transcript = Transcript::new(peer());
    transcript.push_message(&at(ME, 0, "first"), true);
    transcript.push_message(&at(ME, 200, "third"), true);
    let outcome = transcript.push_message(&at(PEER, 100, "second"), true);

    assert_eq!(outcome, PushOutcome::Inserted { block: 1 });
    assert_eq!(
        contents(&transcript),
        vec![vec!["first"], vec!["second"], vec!["third"]]
    );
}

#[test]
fn message_older_than_everything_goes_first() {
    let mut transcript = Transcript::new(peer());
    transcript.push_message(&at(ME, 100, "later"), true);
    let outcome = transcript.push_message(&at(ME, 0, "earlier"), true);

    assert_eq!(outcome, PushOutcome::Inserted { block: 0 });
    assert_eq!(contents(&transcript), vec![vec!["earlier"], vec!["later"]]);
}

#[test]
fn equal_timestamps_keep_arrival_order() {
    let mut transcript = Transcript::new(peer());
    transcript.push_message(&at(PEER, 0, "one"), true);
    transcript.push_message(&at(ME, 0, "two"), true);

    assert_eq!(contents(&transcript), vec![vec!["one"], vec!["two"]]);
}

#[test]
fn duplicate_ids_are_ignored() {
    let mut transcript = Transcript::new(peer());
    let message = at(PEER, 0, "once");
    transcript.push_message(&message, true);
    assert_eq!(
        transcript.push_message(&message, true),
        PushOutcome::Duplicate
    );

    transcript.seed(vec![message.clone()]);
    assert_eq!(contents(&transcript), vec![vec!["once"]]);
}

#[test]
fn capacity_evicts_oldest_blocks() {
    let mut transcript = Transcript::new(peer());
    let mut pushed = Vec::new();
    for i in 0..1025 {
        // Alternate sides so every message is its own block.
        let from = if i % 2 == 0 { ME } else { PEER };
        let message = at(from, i, &format!("m{i}"));
        transcript.push_message(&message, false);
        pushed.push(message);
    }
    let first = &pushed[0];

    assert_eq!(transcript.len(), 1024);
    assert_eq!(
        transcript.blocks().next().map(|b| b.contents[0].as_str()),
        Some("m1")
    );
    assert!(!transcript.contains(&first.id));
}

#[test]
fn small_capacity_reports_shifted_index() {
    let mut transcript = Transcript::with_capacity(peer(), 2);
    transcript.push_message(&at(ME, 0, "a"), false);
    transcript.push_message(&at(PEER, 1, "b"), false);
    let outcome = transcript.push_message(&at(ME, 2, "c"), false);

    assert_eq!(outcome, PushOutcome::Inserted { block: 1 });
    assert_eq!(contents(&transcript), vec![vec!["b"], vec!["c"]]);
}

#[test]
fn auto_scroll_only_when_viewer_was_at_bottom() {
    let mut transcript = Transcript::new(peer());
    transcript.push_message(&at(PEER, 0, "a"), true);
    assert!(transcript.take_scroll_request());
    assert!(!transcript.take_scroll_request());

    // Scrolled far up: 400 + 100 + 32 < 1000.
    transcript.on_scroll(400.0, 100.0, 1000.0);
    assert!(!transcript.sticks_to_bottom());
    transcript.push_message(&at(PEER, 100, "b"), true);
    assert!(!transcript.take_scroll_request());

    // Within the tolerance of the bottom.
    transcript.on_scroll(400.0, 570.0, 1000.0);
    assert!(transcript.sticks_to_bottom());
    transcript.push_message(&at(PEER, 200, "c"), false);
    assert!(!transcript.take_scroll_request());
    transcript.push_message(&at(PEER, 300, "d"), true);
    assert!(transcript.take_scroll_request());
}

#[test]
fn seeding_history_requests_a_scroll() {
    let mut transcript = Transcript::new(peer());
    transcript.seed(vec![at(ME, 0, "a"), at(PEER, 5, "b")]);
    assert_eq!(transcript.len(), 2);
    assert!(transcript.take_scroll_request());
}

#[test]
fn label_shows_time_only_for_today() {
    let now = Local::now();
    let block = DisplayBlock {
        side: Side::Sent,
        started_at: now.with_timezone(&Utc),
        message_ids: Vec::new(),
        contents: Vec::new(),
    };
    assert_eq!(block.label(now).len(), "12:00:00".len());

    let old = DisplayBlock {
        started_at: base() - Duration::days(400),
        ..block
    };
    assert_eq!(old.label(now).len(), "2023-03-28 12:00:00".len());
}
