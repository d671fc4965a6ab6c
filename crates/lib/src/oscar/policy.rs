//! Admission rules applied to each inbound message before it reaches the bot.

use std::collections::VecDeque;
use std::sync::OnceLock;
use std::time::Duration;

use regex::Regex;
use tokio::time::Instant;

/// Length of the rolling rate-limit window.
pub const RATE_WINDOW: Duration = Duration::from_secs(60);

/// Outcome of a rate check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Admitted,
    /// Over the limit. `notify` is true only for the first rejection of an episode.
    Dropped { notify: bool },
}

/// Rolling-window limiter: at most `max_per_window` admissions in any window.
///
/// Also tracks whether the user has already been told to slow down, so the notice goes out once
/// per episode rather than once per rejected message.
#[derive(Debug)]
pub struct RateLimiter {
    max_per_window: u32,
    window: Duration,
    admitted: VecDeque<Instant>,
    limited: bool,
}

impl RateLimiter {
    pub fn new(max_per_window: u32) -> Self {
        Self::with_window(max_per_window, RATE_WINDOW)
    }

    fn with_window(max_per_window: u32, window: Duration) -> Self {
        Self {
            max_per_window,
            window,
            admitted: VecDeque::new(),
            limited: false,
        }
    }

    pub fn check(&mut self) -> Admission {
        self.check_at(Instant::now())
    }

    fn check_at(&mut self, now: Instant) -> Admission {
        while self
            .admitted
            .front()
            .is_some_and(|&t| now.duration_since(t) >= self.window)
        {
            self.admitted.pop_front();
        }

        if self.admitted.len() >= self.max_per_window as usize {
            let notify = !self.limited;
            self.limited = true;
            return Admission::Dropped { notify };
        }

        self.admitted.push_back(now);
        self.limited = false;
        Admission::Admitted
    }

    pub fn is_limited(&self) -> bool {
        self.limited
    }
}

/// Word-count and word-length caps for a single message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SizeLimits {
    pub word_count: usize,
    pub word_length: usize,
}

impl SizeLimits {
    /// True when `text` has too many words or any word is too long.
    pub fn exceeded_by(&self, text: &str) -> bool {
        let mut count = 0;
        for word in text.split_whitespace() {
            count += 1;
            if count > self.word_count || word.chars().count() > self.word_length {
                return true;
            }
        }
        false
    }
}

fn html_tag_regex() -> &'static Regex {
    static CACHED: OnceLock<Regex> = OnceLock::new();
    CACHED.get_or_init(|| Regex::new("<[^>]*>").expect("html tag regex must compile"))
}

/// Remove markup so the bot sees plain text.
pub fn strip_html_tags(input: &str) -> String {
    html_tag_regex().replace_all(input, "").into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drops_after_quota_and_notifies_once() {
        let mut limiter = RateLimiter::new(10);
        let start = Instant::now();
        for i in 0..10 {
            assert_eq!(
                limiter.check_at(start + Duration::from_secs(i)),
                Admission::Admitted
            );
        }
        assert_eq!(
            limiter.check_at(start + Duration::from_secs(10)),
            Admission::Dropped { notify: true }
        );
        assert_eq!(
            limiter.check_at(start + Duration::from_secs(11)),
            Admission::Dropped { notify: false }
        );
        assert_eq!(
            limiter.check_at(start + Duration::from_secs(12)),
            Admission::Dropped { notify: false }
        );
        assert!(limiter.is_limited());
    }

    #[test]
    fn window_roll_over_admits_again_and_resets_episode() {
        let mut limiter = RateLimiter::new(2);
        let start = Instant::now();
        assert_eq!(limiter.check_at(start), Admission::Admitted);
        assert_eq!(limiter.check_at(start), Admission::Admitted);
        assert_eq!(limiter.check_at(start), Admission::Dropped { notify: true });

        let later = start + RATE_WINDOW;
        assert_eq!(limiter.check_at(later), Admission::Admitted);
        assert!(!limiter.is_limited());
        assert_eq!(limiter.check_at(later), Admission::Admitted);
        assert_eq!(limiter.check_at(later), Admission::Dropped { notify: true });
    }

    #[test]
    fn size_limits_on_word_count_and_length() {
        let limits = SizeLimits {
            word_count: 3,
            word_length: 5,
        };
        assert!(!limits.exceeded_by("abcde abcde abcde"));
        assert!(limits.exceeded_by("ab ab ab ab"));
        assert!(limits.exceeded_by("ab abcdef"));
        assert!(!limits.exceeded_by(""));
        assert!(!limits.exceeded_by("   space\tout  "));
        assert!(limits.exceeded_by("   spaced\tout  "));
    }

    #[test]
    fn strips_markup() {
        assert_eq!(
            strip_html_tags(r##"<HTML><BODY BGCOLOR="#ffffff"><FONT>hey <b>you</b></FONT></BODY></HTML>"##),
            "hey you"
        );
        assert_eq!(strip_html_tags("1 < 2"), "1 < 2");
    }
}
