//! Passphrase and password strength estimation
//!
//! Maps an attacker guess count to a human-readable time-to-crack and a
//! qualitative bucket. The crack rate models a 10,000-machine botnet with
//! 2 cores per machine at 4,000 guesses per core per second.

use num_bigint::BigUint;
use num_integer::Integer;
use once_cell::sync::Lazy;
use serde::Serialize;
use tracing::error;

/// Estimated attacker guesses. Arbitrary precision, non-negative.
pub type GuessCount = BigUint;

/// What the secret protects, which decides how strict the bucket table is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SecretKind {
    /// One-time message password. Week-level crack time is acceptable.
    Password,
    /// Long-term private key passphrase. Must hold up for years.
    Passphrase,
}

/// One row of a bucket table: qualitative rating plus UI hints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StrengthBucket {
    /// Substring of the readable crack time this row matches.
    pub match_substring: &'static str,
    pub label: &'static str,
    /// Progress bar fill, 0-100.
    pub bar: u8,
    pub color: &'static str,
    pub passes: bool,
}

/// Result of one strength estimation. Computed on demand, never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrackTimeResult {
    pub bucket: StrengthBucket,
    /// Time to crack in seconds, rounded half-up at the second boundary.
    pub seconds: GuessCount,
    pub human_readable: String,
}

// (10k machines) * (2 cores per machine) * (4k guesses per core per second)
const CRACK_GUESSES_PER_SECOND: u64 = 10_000 * 2 * 4_000;

const SECONDS_PER_MINUTE: u64 = 60;
const SECONDS_PER_HOUR: u64 = 60 * 60;
const SECONDS_PER_DAY: u64 = 24 * 60 * 60;
const SECONDS_PER_WEEK: u64 = 7 * SECONDS_PER_DAY;
const SECONDS_PER_MONTH: u64 = 30 * SECONDS_PER_DAY;
const SECONDS_PER_YEAR: u64 = 365 * SECONDS_PER_DAY;
const SECONDS_PER_CENTURY: u64 = 100 * SECONDS_PER_YEAR;
const SECONDS_PER_MILLENNIUM: u64 = 1_000 * SECONDS_PER_CENTURY;

static GUESSES_PER_SECOND: Lazy<BigUint> = Lazy::new(|| BigUint::from(CRACK_GUESSES_PER_SECOND));
static HALF_GUESSES_PER_SECOND: Lazy<BigUint> =
    Lazy::new(|| BigUint::from(CRACK_GUESSES_PER_SECOND / 2));

// Ordered top-to-bottom; first matching substring wins. The empty-match row
// is the catch-all, so lookup can only miss if a table loses it.
#[rustfmt::skip]
const BUCKETS_PASSWORD: &[StrengthBucket] = &[
    StrengthBucket { match_substring: "millenni", label: "perfect", bar: 100, color: "green", passes: true },
    StrengthBucket { match_substring: "centu", label: "perfect", bar: 95, color: "green", passes: true },
    StrengthBucket { match_substring: "year", label: "great", bar: 80, color: "orange", passes: true },
    StrengthBucket { match_substring: "month", label: "good", bar: 70, color: "darkorange", passes: true },
    StrengthBucket { match_substring: "week", label: "good", bar: 30, color: "darkred", passes: true },
    StrengthBucket { match_substring: "day", label: "reasonable", bar: 40, color: "darkorange", passes: true },
    StrengthBucket { match_substring: "hour", label: "bare minimum", bar: 20, color: "darkred", passes: true },
    StrengthBucket { match_substring: "minute", label: "poor", bar: 15, color: "red", passes: false },
    StrengthBucket { match_substring: "", label: "weak", bar: 10, color: "red", passes: false },
];

#[rustfmt::skip]
const BUCKETS_PASSPHRASE: &[StrengthBucket] = &[
    StrengthBucket { match_substring: "millenni", label: "perfect", bar: 100, color: "green", passes: true },
    StrengthBucket { match_substring: "centu", label: "great", bar: 80, color: "green", passes: true },
    StrengthBucket { match_substring: "year", label: "good", bar: 60, color: "orange", passes: true },
    StrengthBucket { match_substring: "month", label: "reasonable", bar: 40, color: "darkorange", passes: true },
    StrengthBucket { match_substring: "week", label: "poor", bar: 30, color: "darkred", passes: false },
    StrengthBucket { match_substring: "day", label: "poor", bar: 20, color: "darkred", passes: false },
    StrengthBucket { match_substring: "", label: "weak", bar: 10, color: "red", passes: false },
];

/// Estimate how long the modeled botnet needs to exhaust `guesses`, and
/// grade the result against the bucket table for `kind`.
///
/// A readable time that matches no table row indicates a logic bug; it is
/// logged and graded with the weakest bucket instead of propagating a panic.
pub fn estimate(guesses: &GuessCount, kind: SecretKind) -> CrackTimeResult {
    let (mut seconds, remainder) = guesses.div_rem(&GUESSES_PER_SECOND);
    if remainder >= *HALF_GUESSES_PER_SECOND {
        seconds += 1u32;
    }

    let human_readable = readable_crack_time(&seconds);

    let table = match kind {
        SecretKind::Password => BUCKETS_PASSWORD,
        SecretKind::Passphrase => BUCKETS_PASSPHRASE,
    };

    let bucket = match table
        .iter()
        .find(|b| human_readable.contains(b.match_substring))
    {
        Some(bucket) => *bucket,
        None => {
            error!(
                "No strength bucket matches '{}' for {:?} (guesses: {})",
                human_readable, kind, guesses
            );
            StrengthBucket {
                match_substring: "",
                label: "weak",
                bar: 10,
                color: "red",
                passes: false,
            }
        }
    };

    CrackTimeResult {
        bucket,
        seconds,
        human_readable,
    }
}

/// Convert a second count to its largest applicable unit, rounding half-up
/// at each unit's granularity.
fn readable_crack_time(total_seconds: &BigUint) -> String {
    let millennia = div_half_up(total_seconds, SECONDS_PER_MILLENNIUM);
    if millennia > BigUint::ZERO {
        return if millennia == BigUint::from(1u32) {
            "a millennium".to_string()
        } else {
            "millennia".to_string()
        };
    }

    let centuries = div_half_up(total_seconds, SECONDS_PER_CENTURY);
    if centuries > BigUint::ZERO {
        return if centuries == BigUint::from(1u32) {
            "a century".to_string()
        } else {
            "centuries".to_string()
        };
    }

    let years = div_half_up(total_seconds, SECONDS_PER_YEAR);
    if years > BigUint::ZERO {
        return format!("{} year{}", years, plural_ending(&years));
    }

    let months = div_half_up(total_seconds, SECONDS_PER_MONTH);
    if months > BigUint::ZERO {
        return format!("{} month{}", months, plural_ending(&months));
    }

    let weeks = div_half_up(total_seconds, SECONDS_PER_WEEK);
    if weeks > BigUint::ZERO {
        return format!("{} week{}", weeks, plural_ending(&weeks));
    }

    let days = div_half_up(total_seconds, SECONDS_PER_DAY);
    if days > BigUint::ZERO {
        return format!("{} day{}", days, plural_ending(&days));
    }

    let hours = div_half_up(total_seconds, SECONDS_PER_HOUR);
    if hours > BigUint::ZERO {
        return format!("{} hour{}", hours, plural_ending(&hours));
    }

    let minutes = div_half_up(total_seconds, SECONDS_PER_MINUTE);
    if minutes > BigUint::ZERO {
        return format!("{} minute{}", minutes, plural_ending(&minutes));
    }

    if *total_seconds > BigUint::ZERO {
        return format!("{} second{}", total_seconds, plural_ending(total_seconds));
    }

    "less than a second".to_string()
}

fn div_half_up(n: &BigUint, unit: u64) -> BigUint {
    (n + BigUint::from(unit / 2)) / BigUint::from(unit)
}

fn plural_ending(n: &BigUint) -> &'static str {
    if *n > BigUint::from(1u32) {
        "s"
    } else {
        ""
    }
}
