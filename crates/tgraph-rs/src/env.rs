use std::env;
use std::sync::OnceLock;

static OPT_PRE_ITERS: OnceLock<Option<usize>> = OnceLock::new();
static OPT_POST_ITERS: OnceLock<Option<usize>> = OnceLock::new();
static PASS_STATS: OnceLock<bool> = OnceLock::new();
static CHECK_FINITE: OnceLock<bool> = OnceLock::new();
static COMPILE_CACHE: OnceLock<bool> = OnceLock::new();

fn parse_bool(value: &str) -> bool {
    let normalized = value.trim().to_ascii_lowercase();
    matches!(normalized.as_str(), "1" | "true" | "yes" | "on")
}

fn read_bool(key: &str, default: bool) -> bool {
    match env::var(key) {
        Ok(value) if !value.trim().is_empty() => parse_bool(&value),
        _ => default,
    }
}

fn read_usize(key: &str) -> Option<usize> {
    env::var(key).ok().and_then(|value| value.trim().parse().ok())
}

pub(crate) fn opt_pre_iters() -> Option<usize> {
    *OPT_PRE_ITERS.get_or_init(|| read_usize("TGRAPH_OPT_PRE_ITERS"))
}

pub(crate) fn opt_post_iters() -> Option<usize> {
    *OPT_POST_ITERS.get_or_init(|| read_usize("TGRAPH_OPT_POST_ITERS"))
}

pub(crate) fn pass_stats_enabled() -> bool {
    *PASS_STATS.get_or_init(|| read_bool("TGRAPH_PASS_STATS", false))
}

pub(crate) fn check_finite_default() -> bool {
    *CHECK_FINITE.get_or_init(|| read_bool("TGRAPH_CHECK_FINITE", false))
}

pub(crate) fn compile_cache_enabled() -> bool {
    *COMPILE_CACHE.get_or_init(|| read_bool("TGRAPH_COMPILE_CACHE", true))
}

#[cfg(test)]
mod tests {
    use super::parse_bool;

    #[test]
    fn parse_bool_accepts_common_spellings() {
        assert!(parse_bool(" Yes "));
        assert!(parse_bool("1"));
        assert!(!parse_bool("off"));
        assert!(!parse_bool(""));
    }
}
