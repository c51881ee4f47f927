use anyhow::Result;
use std::future::Future;
use std::pin::Pin;
use tracing::warn;

mod openai;

pub use openai::OpenAiRewriter;

pub type RewriteFuture = Pin<Box<dyn Future<Output = Result<String>> + Send>>;

/// External text-rewriting service: one call per text unit, fallible.
pub trait RewriteService: Send + Sync {
    fn rewrite(&self, text: &str, target_lang: &str) -> RewriteFuture;
}

/// What happened to one line of text. `Degraded` carries the fallback
/// text (the original, untranslated line) and the reason, so callers
/// can log and tests can assert on the degradation path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rewritten {
    Translated(String),
    Degraded { text: String, reason: String },
}

impl Rewritten {
    pub fn text(&self) -> &str {
        match self {
            Rewritten::Translated(text) => text,
            Rewritten::Degraded { text, .. } => text,
        }
    }
}

/// System instruction sent with every rewrite request.
pub fn instruction(target_lang: &str) -> String {
    format!(
        "You are a professional translator. Translate the user's text to {target_lang}. Respond with only the translated text, preserving punctuation, numbers, and line or list markers exactly. Do not add any explanation or preamble."
    )
}

/// Uniform contract over the rewrite service: blank text short-circuits,
/// responses are sanitized deterministically, and any service failure
/// degrades to the original text instead of propagating. No retry here;
/// callers may add their own.
pub async fn rewrite_line(
    service: &dyn RewriteService,
    text: &str,
    target_lang: &str,
) -> Rewritten {
    if text.trim().is_empty() {
        return Rewritten::Translated(text.to_string());
    }
    match service.rewrite(text, target_lang).await {
        Ok(translated) => {
            let cleaned = sanitize_translation(&translated);
            if cleaned.is_empty() {
                Rewritten::Degraded {
                    text: text.to_string(),
                    reason: "empty translation".to_string(),
                }
            } else {
                Rewritten::Translated(cleaned)
            }
        }
        Err(err) => {
            warn!("rewrite failed, keeping original text: {err:#}");
            Rewritten::Degraded {
                text: text.to_string(),
                reason: format!("{err:#}"),
            }
        }
    }
}

/// Leading characters that show up as translation-step artifacts or
/// mis-rendered bullets.
const BULLET_CHARS: &[char] = &['•', '◦', '·', '-', '–', '—', '*', '?'];

const PREAMBLE_OPENERS: &[&str] = &["sure", "certainly", "here's", "here is", "okay", "ok"];

/// How far into the text a preamble's trailing colon may sit before
/// we stop treating it as a preamble.
const PREAMBLE_SCAN_LIMIT: usize = 80;

/// Deterministic cleanup applied to every service response,
/// independent of how well the service followed its instruction.
pub fn sanitize_translation(text: &str) -> String {
    let stripped =
        text.trim_start_matches(|ch: char| ch.is_whitespace() || BULLET_CHARS.contains(&ch));
    strip_preamble(stripped).trim().to_string()
}

/// Drops a conversational opener ("Sure, here is the translation:")
/// when present. The opener must be followed by a separator; if a
/// colon follows within a short window the whole lead-in up to the
/// colon goes too.
fn strip_preamble(text: &str) -> &str {
    let Some(opener) = PREAMBLE_OPENERS
        .iter()
        .find(|opener| ascii_starts_with(text, opener))
    else {
        return text;
    };

    let rest = &text[opener.len()..];
    let has_separator =
        rest.starts_with(char::is_whitespace) || rest.starts_with([',', ':', '.', '!', '-']);
    if !has_separator {
        return text;
    }

    if let Some(colon) = text.find(':') {
        if colon <= PREAMBLE_SCAN_LIMIT {
            return text[colon + 1..].trim_start();
        }
    }
    rest.trim_start_matches(|ch: char| ch.is_whitespace() || matches!(ch, ',' | '.' | '!' | '-'))
}

fn ascii_starts_with(text: &str, prefix: &str) -> bool {
    text.len() >= prefix.len()
        && text.as_bytes()[..prefix.len()].eq_ignore_ascii_case(prefix.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;

    struct Stub(&'static str);

    impl RewriteService for Stub {
        fn rewrite(&self, _text: &str, _target_lang: &str) -> RewriteFuture {
            let reply = self.0.to_string();
            Box::pin(async move { Ok(reply) })
        }
    }

    struct AlwaysFails;

    impl RewriteService for AlwaysFails {
        fn rewrite(&self, _text: &str, _target_lang: &str) -> RewriteFuture {
            Box::pin(async { Err(anyhow!("service unreachable")) })
        }
    }

    #[test]
    fn bullet_prefixes_are_stripped() {
        assert_eq!(sanitize_translation("• Hola mundo"), "Hola mundo");
        assert_eq!(sanitize_translation("– * Hola"), "Hola");
    }

    #[test]
    fn preamble_with_colon_is_stripped() {
        assert_eq!(
            sanitize_translation("Sure, here is the translation: Hola mundo"),
            "Hola mundo"
        );
        assert_eq!(
            sanitize_translation("Here's the text in Spanish: Hola"),
            "Hola"
        );
    }

    #[test]
    fn preamble_without_colon_drops_only_the_opener() {
        assert_eq!(sanitize_translation("Okay. Bonjour"), "Bonjour");
    }

    #[test]
    fn ordinary_text_passes_through() {
        assert_eq!(sanitize_translation("Bonjour le monde"), "Bonjour le monde");
        // "Surely" is not the opener "sure" + separator.
        assert_eq!(sanitize_translation("Surely not"), "Surely not");
    }

    #[tokio::test]
    async fn failing_service_degrades_to_original_text() {
        let outcome = rewrite_line(&AlwaysFails, "Hello world", "French").await;
        match outcome {
            Rewritten::Degraded { text, reason } => {
                assert_eq!(text, "Hello world");
                assert!(reason.contains("unreachable"));
            }
            other => panic!("expected degraded outcome, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn blank_text_skips_the_service() {
        // AlwaysFails would degrade; the blank fast path never calls it.
        let outcome = rewrite_line(&AlwaysFails, "   ", "French").await;
        assert_eq!(outcome, Rewritten::Translated("   ".to_string()));
    }

    #[tokio::test]
    async fn successful_rewrite_is_sanitized() {
        let outcome = rewrite_line(&Stub("Sure: Bonjour le monde"), "Hello world", "French").await;
        assert_eq!(outcome, Rewritten::Translated("Bonjour le monde".to_string()));
    }

    #[tokio::test]
    async fn empty_translation_degrades() {
        let outcome = rewrite_line(&Stub("  "), "Hello", "French").await;
        assert!(matches!(outcome, Rewritten::Degraded { .. }));
    }
}
