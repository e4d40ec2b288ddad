//! Decides whether an incoming message gets a reply.
//!
//! Order of checks: bot authors are ignored, explicit mentions always get a
//! reply, otherwise a keyword must match and a random draw decides. Questions
//! use a separate (usually higher) probability than plain keyword hits.

use std::sync::Arc;

use rand::Rng;

use relay_core::config::TriggerConfig;

use super::message::ChannelMessage;

/// Why a response cycle was started.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerKind {
    Mention,
    Question,
    Keyword,
}

impl TriggerKind {
    /// Extra system-prompt fragment for this kind of trigger.
    pub fn instruction(self) -> Option<&'static str> {
        match self {
            TriggerKind::Mention => None,
            TriggerKind::Question => Some(
                "Someone in the channel just asked a question that concerns you. \
                 Answer it directly and politely.",
            ),
            TriggerKind::Keyword => Some(
                "A topic related to you just came up in the conversation. \
                 Nobody addressed you directly, so join in naturally and keep it short.",
            ),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TriggerKind::Mention => "mention",
            TriggerKind::Question => "question",
            TriggerKind::Keyword => "keyword",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoreReason {
    FromBot,
    NoKeyword,
    /// A keyword matched but the random draw was above the probability.
    NotDrawn,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerDecision {
    Respond(TriggerKind),
    Ignore(IgnoreReason),
}

impl TriggerDecision {
    pub fn should_respond(&self) -> bool {
        matches!(self, TriggerDecision::Respond(_))
    }

    pub fn kind(&self) -> Option<TriggerKind> {
        match self {
            TriggerDecision::Respond(kind) => Some(*kind),
            TriggerDecision::Ignore(_) => None,
        }
    }
}

/// Uniform source of draws in `[0, 1)`.
pub trait RandomSource: Send + Sync {
    fn next_f64(&self) -> f64;
}

/// Thread-local RNG; independent draw per message.
#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadRandom;

impl RandomSource for ThreadRandom {
    fn next_f64(&self) -> f64 {
        rand::thread_rng().gen::<f64>()
    }
}

/// Always returns the same value. For tests and for forcing behaviour.
#[derive(Debug, Clone, Copy)]
pub struct FixedRandom(pub f64);

impl RandomSource for FixedRandom {
    fn next_f64(&self) -> f64 {
        self.0
    }
}

pub struct TriggerEvaluator {
    keywords: Vec<String>,
    question_markers: Vec<String>,
    question_probability: f64,
    keyword_probability: f64,
    random: Arc<dyn RandomSource>,
}

impl TriggerEvaluator {
    /// Keywords and markers are expected lower-cased (see `RelayConfig::normalize`).
    pub fn new(config: &TriggerConfig, random: Arc<dyn RandomSource>) -> Self {
        Self {
            keywords: config.keywords.iter().cloned().collect(),
            question_markers: config.question_markers.clone(),
            question_probability: config.question_probability,
            keyword_probability: config.keyword_probability,
            random,
        }
    }

    pub fn evaluate(&self, msg: &ChannelMessage, bot_id: u64) -> TriggerDecision {
        if msg.author_is_bot {
            return TriggerDecision::Ignore(IgnoreReason::FromBot);
        }

        if msg.mentions_user(bot_id) {
            return TriggerDecision::Respond(TriggerKind::Mention);
        }

        let text = msg.content.to_lowercase();
        let Some(keyword) = self.matched_keyword(&text) else {
            return TriggerDecision::Ignore(IgnoreReason::NoKeyword);
        };

        let (kind, probability) = if self.is_question(&text) {
            (TriggerKind::Question, self.question_probability)
        } else {
            (TriggerKind::Keyword, self.keyword_probability)
        };

        let draw = self.random.next_f64();
        tracing::debug!(
            keyword,
            kind = kind.as_str(),
            draw,
            probability,
            "keyword trigger"
        );

        if draw < probability {
            TriggerDecision::Respond(kind)
        } else {
            TriggerDecision::Ignore(IgnoreReason::NotDrawn)
        }
    }

    fn matched_keyword(&self, lowered: &str) -> Option<&str> {
        self.keywords
            .iter()
            .find(|k| lowered.contains(k.as_str()))
            .map(String::as_str)
    }

    fn is_question(&self, lowered: &str) -> bool {
        self.question_markers
            .iter()
            .any(|m| lowered.contains(m.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BOT: u64 = 1000;

    fn config() -> TriggerConfig {
        TriggerConfig {
            keywords: ["kotone", "ことね", "idol"]
                .into_iter()
                .map(String::from)
                .collect(),
            ..TriggerConfig::default()
        }
    }

    fn evaluator(draw: f64) -> TriggerEvaluator {
        TriggerEvaluator::new(&config(), Arc::new(FixedRandom(draw)))
    }

    fn message(content: &str) -> ChannelMessage {
        ChannelMessage {
            id: 1,
            author_id: 7,
            author_is_bot: false,
            display_name: "alice".into(),
            content: content.into(),
            mentions: Vec::new(),
        }
    }

    #[test]
    fn bot_authors_are_always_ignored() {
        let mut msg = message("<@1000> Kotone what is this?");
        msg.author_is_bot = true;
        msg.mentions = vec![BOT];
        assert_eq!(
            evaluator(0.0).evaluate(&msg, BOT),
            TriggerDecision::Ignore(IgnoreReason::FromBot)
        );
    }

    #[test]
    fn mention_always_responds_regardless_of_draw() {
        let mut msg = message("<@1000> hi");
        msg.mentions = vec![BOT];
        for draw in [0.0, 0.5, 0.999_999] {
            let decision = evaluator(draw).evaluate(&msg, BOT);
            assert_eq!(decision, TriggerDecision::Respond(TriggerKind::Mention));
        }
    }

    #[test]
    fn mention_of_someone_else_is_not_a_mention() {
        let mut msg = message("<@55> hi");
        msg.mentions = vec![55];
        assert_eq!(
            evaluator(0.0).evaluate(&msg, BOT),
            TriggerDecision::Ignore(IgnoreReason::NoKeyword)
        );
    }

    #[test]
    fn no_keyword_means_no_reply() {
        let decision = evaluator(0.0).evaluate(&message("what is the weather?"), BOT);
        assert!(!decision.should_respond());
        assert_eq!(decision, TriggerDecision::Ignore(IgnoreReason::NoKeyword));
    }

    #[test]
    fn keyword_match_is_case_insensitive() {
        let decision = evaluator(0.0).evaluate(&message("I saw KOTONE today"), BOT);
        assert_eq!(decision.kind(), Some(TriggerKind::Keyword));
    }

    #[test]
    fn question_with_low_draw_responds() {
        let decision = evaluator(0.05).evaluate(&message("Kotone, what song is this?"), BOT);
        assert_eq!(decision, TriggerDecision::Respond(TriggerKind::Question));
    }

    #[test]
    fn question_with_high_draw_is_skipped() {
        let decision = evaluator(0.95).evaluate(&message("Kotone, what song is this?"), BOT);
        assert_eq!(decision, TriggerDecision::Ignore(IgnoreReason::NotDrawn));
    }

    #[test]
    fn japanese_question_markers_are_detected() {
        let eval = evaluator(0.05);
        assert_eq!(
            eval.evaluate(&message("ことねって誰ですか"), BOT),
            TriggerDecision::Respond(TriggerKind::Question)
        );
        assert_eq!(
            eval.evaluate(&message("ことね？"), BOT),
            TriggerDecision::Respond(TriggerKind::Question)
        );
    }

    #[test]
    fn keyword_probability_is_separate_from_question_probability() {
        // 0.8 is below question_probability (0.9) but above keyword_probability (0.7)
        let eval = evaluator(0.8);
        assert!(eval.evaluate(&message("kotone tell me more"), BOT).should_respond());
        assert_eq!(
            eval.evaluate(&message("kotone is great"), BOT),
            TriggerDecision::Ignore(IgnoreReason::NotDrawn)
        );
    }

    #[test]
    fn probability_one_always_responds() {
        let mut cfg = config();
        cfg.question_probability = 1.0;
        let eval = TriggerEvaluator::new(&cfg, Arc::new(FixedRandom(0.999_999)));
        assert!(eval.evaluate(&message("idol?"), BOT).should_respond());
    }

    #[test]
    fn probability_zero_never_responds() {
        let mut cfg = config();
        cfg.keyword_probability = 0.0;
        let eval = TriggerEvaluator::new(&cfg, Arc::new(FixedRandom(0.0)));
        assert!(!eval.evaluate(&message("idol concert"), BOT).should_respond());
    }

    #[test]
    fn thread_random_stays_in_unit_interval() {
        let rng = ThreadRandom;
        for _ in 0..1000 {
            let x = rng.next_f64();
            assert!((0.0..1.0).contains(&x));
        }
    }
}
