//! Property-based tests for the state machine
//!
//! Event sequences are folded through `transition` and the effects are
//! applied to a real `Conversation`, mirroring what the runtime does
//! minus the network.

use super::transition::*;
use super::*;
use crate::conversation::{Conversation, Message, APOLOGY, GREETING};
use proptest::prelude::*;

// ============================================================================
// Test Helpers
// ============================================================================

/// Apply the conversation-visible effects of a transition
fn apply(conversation: &mut Conversation, effects: &[Effect]) {
    for effect in effects {
        match effect {
            Effect::AppendUserMessage { id, text } => {
                conversation.push(Message::user(*id, text.clone()));
            }
            Effect::AppendPlaceholder { id } => {
                conversation.push(Message::placeholder(*id));
            }
            Effect::AppendFragment { target, text } => {
                conversation.append_fragment(*target, text);
            }
            Effect::FinishMessage { target } => {
                conversation.finish(*target);
            }
            Effect::FailMessage { target } => {
                conversation.fail(*target);
            }
            Effect::TruncateToSeed => conversation.truncate_to_seed(),
            Effect::StartStream { .. }
            | Effect::AbortStream
            | Effect::SwitchModel { .. }
            | Effect::RebuildContext
            | Effect::NotifyBusy { .. } => {}
        }
    }
}

/// Run one event, returning whether it was accepted
fn step(state: &mut ChatState, conversation: &mut Conversation, event: Event) -> bool {
    match transition(state, conversation, event) {
        Ok(result) => {
            apply(conversation, &result.effects);
            *state = result.new_state;
            true
        }
        Err(_) => false,
    }
}

// ============================================================================
// Arbitrary Generators
// ============================================================================

fn arb_text() -> impl Strategy<Value = String> {
    prop_oneof![
        3 => "[a-zA-Z ]{1,12}",
        1 => "[ \t]{0,3}",
    ]
}

fn arb_fragment() -> impl Strategy<Value = String> {
    "[a-zA-Z!?. ]{0,6}"
}

fn arb_event() -> impl Strategy<Value = Event> {
    prop_oneof![
        3 => arb_text().prop_map(|text| Event::UserMessage { text }),
        5 => arb_fragment().prop_map(|text| Event::Fragment { text }),
        2 => Just(Event::StreamCompleted),
        1 => "[a-z ]{1,10}".prop_map(|message| Event::StreamFailed { message }),
        1 => Just(Event::Cancel),
        1 => Just(Event::Reset),
        1 => prop_oneof![
            Just("gemini-2.5-flash".to_string()),
            Just("gemini-3-pro-preview".to_string()),
        ]
        .prop_map(|model_id| Event::SelectModel { model_id }),
    ]
}

// ============================================================================
// Property Tests
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(500))]

    /// The conversation never holds more than one streaming message, and
    /// one exists exactly while the state is busy
    #[test]
    fn prop_single_streaming_message(events in proptest::collection::vec(arb_event(), 0..40)) {
        let mut state = ChatState::Idle;
        let mut conv = Conversation::new();

        for event in events {
            step(&mut state, &mut conv, event);

            let streaming: Vec<_> = conv.messages().iter().filter(|m| m.is_streaming).collect();
            prop_assert!(streaming.len() <= 1);
            match state {
                ChatState::Streaming { target } => {
                    prop_assert_eq!(streaming.len(), 1);
                    prop_assert_eq!(streaming[0].id, target);
                }
                ChatState::Idle => prop_assert!(streaming.is_empty()),
            }
        }
    }

    /// Seed greeting survives everything and ids stay strictly increasing
    #[test]
    fn prop_seed_and_id_order(events in proptest::collection::vec(arb_event(), 0..40)) {
        let mut state = ChatState::Idle;
        let mut conv = Conversation::new();

        for event in events {
            step(&mut state, &mut conv, event);
        }

        prop_assert_eq!(&conv.messages()[0].text, GREETING);
        for pair in conv.messages().windows(2) {
            prop_assert!(pair[0].id < pair[1].id);
        }
    }

    /// A completed reply reads as the concatenation of its fragments
    #[test]
    fn prop_reply_is_fragment_concatenation(
        text in "[a-zA-Z]{1,10}",
        fragments in proptest::collection::vec(arb_fragment(), 0..10),
    ) {
        let mut state = ChatState::Idle;
        let mut conv = Conversation::new();

        let accepted = step(&mut state, &mut conv, Event::UserMessage { text: text.clone() });
        prop_assert!(accepted);
        let ChatState::Streaming { target } = state else {
            return Err(TestCaseError::fail("expected streaming state"));
        };
        for fragment in &fragments {
            let accepted = step(&mut state, &mut conv, Event::Fragment { text: fragment.clone() });
            prop_assert!(accepted);
        }
        prop_assert!(step(&mut state, &mut conv, Event::StreamCompleted));

        let reply = conv.get(target).unwrap();
        prop_assert_eq!(&reply.text, &fragments.concat());
        prop_assert!(!reply.is_streaming);
        prop_assert!(!reply.is_error);
        prop_assert_eq!(conv.len(), 3);
    }

    /// A failure replaces any partial text with exactly the apology
    #[test]
    fn prop_failure_yields_apology(
        fragments in proptest::collection::vec(arb_fragment(), 0..5),
        message in "[a-z ]{1,20}",
    ) {
        let mut state = ChatState::Idle;
        let mut conv = Conversation::new();

        step(&mut state, &mut conv, Event::UserMessage { text: "Hi".to_string() });
        for fragment in fragments {
            step(&mut state, &mut conv, Event::Fragment { text: fragment });
        }
        let accepted = step(&mut state, &mut conv, Event::StreamFailed { message });
        prop_assert!(accepted);

        let last = conv.messages().last().unwrap();
        prop_assert_eq!(&last.text, APOLOGY);
        prop_assert!(last.is_error);
        prop_assert_eq!(state, ChatState::Idle);
    }

    /// Rejected events leave state and conversation untouched
    #[test]
    fn prop_rejections_change_nothing(
        prefix in proptest::collection::vec(arb_event(), 0..20),
        event in arb_event(),
    ) {
        let mut state = ChatState::Idle;
        let mut conv = Conversation::new();
        for e in prefix {
            step(&mut state, &mut conv, e);
        }

        let before_state = state;
        let before: Vec<_> = conv.messages().to_vec();
        if !step(&mut state, &mut conv, event) {
            prop_assert_eq!(state, before_state);
            prop_assert_eq!(conv.messages(), before.as_slice());
        }
    }

    /// Busy rejects new turns, model switches and resets
    #[test]
    fn prop_busy_rejects_control_events(text in "[a-zA-Z]{1,10}") {
        let mut state = ChatState::Idle;
        let mut conv = Conversation::new();
        step(&mut state, &mut conv, Event::UserMessage { text: text.clone() });
        prop_assert!(state.is_busy());

        for event in [
            Event::UserMessage { text },
            Event::Reset,
            Event::SelectModel { model_id: "gemini-3-pro-preview".to_string() },
        ] {
            let result = transition(&state, &conv, event);
            prop_assert!(matches!(result, Err(TransitionError::Busy)));
        }
    }

    /// Reset from idle always leaves just the seed
    #[test]
    fn prop_reset_leaves_seed(events in proptest::collection::vec(arb_event(), 0..30)) {
        let mut state = ChatState::Idle;
        let mut conv = Conversation::new();
        for event in events {
            step(&mut state, &mut conv, event);
        }
        if state.is_busy() {
            step(&mut state, &mut conv, Event::Cancel);
        }

        prop_assert!(step(&mut state, &mut conv, Event::Reset));
        prop_assert_eq!(conv.len(), 1);
        prop_assert_eq!(&conv.messages()[0].text, GREETING);
    }
}
