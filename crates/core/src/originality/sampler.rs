//! Excerpt selection for cheap sampled checks.

use rand::Rng;

use super::OriginalityConfig;

/// Introductions and conclusions are formulaic; samples come from this band.
const ZONE_START: f64 = 0.15;
const ZONE_END: f64 = 0.85;

/// Placement attempts per excerpt before giving up on a non-overlapping one.
const PLACEMENT_ATTEMPTS: usize = 20;

/// Pick up to `config.sample_size` non-overlapping excerpts from the middle
/// of `text`, aligned to sentence boundaries where one is near.
///
/// If the middle band is too short for that many excerpts it is returned
/// whole as the only sample.
pub fn extract_samples<R: Rng + ?Sized>(
    text: &str,
    config: &OriginalityConfig,
    rng: &mut R,
) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    let total = chars.len();
    let zone = &chars[(total as f64 * ZONE_START) as usize..(total as f64 * ZONE_END) as usize];
    let zone_len = zone.len();

    let min_len = config.excerpt_min_chars.max(1);
    let max_len = config.excerpt_max_chars.max(min_len);
    let wanted = config.sample_size;

    if wanted == 0 || zone_len == 0 {
        return Vec::new();
    }
    if zone_len < min_len * wanted || zone_len < max_len {
        return vec![zone.iter().collect()];
    }

    let mut used: Vec<(usize, usize)> = Vec::new();
    let mut samples = Vec::with_capacity(wanted);

    for _ in 0..wanted {
        let len = rng.random_range(min_len..=max_len);
        let max_start = zone_len - len;

        for _ in 0..PLACEMENT_ATTEMPTS {
            let start = rng.random_range(0..=max_start);
            let end = start + len;
            if used.iter().any(|&(s, e)| start < e && end > s) {
                continue;
            }

            let start = rfind_sentence_end(zone, start.saturating_sub(100), (start + 50).min(zone_len))
                .map(|p| p + 2)
                .unwrap_or(start);
            let end = find_sentence_end(zone, end.saturating_sub(50), (end + 100).min(zone_len))
                .map(|p| p + 1)
                .unwrap_or(end);
            if start >= end {
                continue;
            }

            samples.push(zone[start..end].iter().collect());
            used.push((start, end));
            break;
        }
    }
    samples
}

/// Position of the last ". " within `zone[from..to]`.
fn rfind_sentence_end(zone: &[char], from: usize, to: usize) -> Option<usize> {
    (from..to.saturating_sub(1))
        .rev()
        .find(|&i| zone[i] == '.' && zone[i + 1] == ' ')
        .filter(|&i| i > 0)
}

/// Position of the first ". " within `zone[from..to]`.
fn find_sentence_end(zone: &[char], from: usize, to: usize) -> Option<usize> {
    (from..to.saturating_sub(1)).find(|&i| zone[i] == '.' && zone[i + 1] == ' ')
}
