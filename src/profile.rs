//! Session identity profile and its generator.
//!
//! A page context gets exactly one `IdentityProfile`, shared by every
//! interceptor through an `Rc`. The background worker derives a separate
//! `HeaderProfile` on every rotation; the two are deliberately unrelated.

use std::net::Ipv4Addr;
use std::sync::LazyLock;

use rand::seq::SliceRandom;
use rand::Rng;
use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};

use crate::config::UserAgentSource;

/// Candidate `Accept-Language` values.
pub const LANGUAGE_HEADERS: &[&str] = &[
    "fr-FR,fr;q=0.9,en;q=0.8",
    "de-DE,de;q=0.9,en;q=0.8",
    "es-ES,es;q=0.9,en;q=0.8",
    "it-IT,it;q=0.9,en;q=0.8",
    "ja-JP,ja;q=0.9,en;q=0.8",
    "zh-CN,zh;q=0.9,en;q=0.8",
    "pt-BR,pt;q=0.9,en;q=0.8",
    "ru-RU,ru;q=0.9,en;q=0.8",
];

/// Candidate `Accept` values.
pub const ACCEPT_HEADERS: &[&str] = &[
    "text/html,application/xhtml+xml,application/xml;q=0.9,image/avif,image/webp,image/apng,*/*;q=0.8,application/signed-exchange;v=b3;q=0.7",
    "text/html,application/xhtml+xml,application/xml;q=0.9,image/webp,*/*;q=0.8",
    "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8",
    "text/html,application/xhtml+xml,application/xml;q=0.9,image/avif,image/webp,*/*;q=0.8",
    "text/html,application/xhtml+xml,application/xml;q=0.9,image/webp,image/apng,*/*;q=0.8",
    "text/html,application/xhtml+xml,application/xml;q=0.8,image/avif,image/webp,image/apng,*/*;q=0.5",
];

/// Candidate `User-Agent` values.
pub const USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/123.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/123.0.0.0 Safari/537.36",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/123.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:109.0) Gecko/20100101 Firefox/123.0",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.0 Safari/605.1.15",
];

/// RFC1918 blocks as (network, prefix length).
pub const PRIVATE_RANGES: [(Ipv4Addr, u32); 3] = [
    (Ipv4Addr::new(10, 0, 0, 0), 8),
    (Ipv4Addr::new(172, 16, 0, 0), 12),
    (Ipv4Addr::new(192, 168, 0, 0), 16),
];

static BROWSER_VERSION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(Chrome|Firefox|Safari|Edge|Opera)/(\d+)\.(\d+)").expect("valid browser version pattern")
});

const BASE36: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";

/// Per-channel canvas color shift.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CanvasShift {
    pub r: i8,
    pub g: i8,
    pub b: i8,
}

impl CanvasShift {
    pub const MAX: i8 = 5;

    pub fn random(rng: &mut impl Rng) -> Self {
        Self {
            r: rng.gen_range(-Self::MAX..=Self::MAX),
            g: rng.gen_range(-Self::MAX..=Self::MAX),
            b: rng.gen_range(-Self::MAX..=Self::MAX),
        }
    }

    /// Shift one RGBA pixel in place, clamping each color channel.
    /// Alpha is never touched.
    #[inline]
    pub fn apply(&self, pixel: &mut [u8]) {
        for (channel, delta) in pixel.iter_mut().zip([self.r, self.g, self.b]) {
            *channel = (i16::from(*channel) + i16::from(delta)).clamp(0, 255) as u8;
        }
    }
}

/// Reference geometry every screen read is derived from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScreenBaseline {
    pub width: u32,
    pub height: u32,
    pub color_depth: u32,
    pub pixel_depth: u32,
}

impl Default for ScreenBaseline {
    fn default() -> Self {
        Self {
            width: 1920,
            height: 1080,
            color_depth: 24,
            pixel_depth: 24,
        }
    }
}

/// Browser-version perturbation parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UaNoise {
    /// Major version moves by less than this many steps, either way.
    pub level: u32,
    /// Floor for the perturbed major version.
    pub min_major: u32,
}

impl UaNoise {
    pub const MAX_LEVEL: u32 = 4;
    pub const MIN_MAJOR: u32 = 70;

    pub fn random(rng: &mut impl Rng) -> Self {
        Self {
            level: rng.gen_range(1..=Self::MAX_LEVEL),
            min_major: Self::MIN_MAJOR,
        }
    }
}

/// Probability parameters for element-geometry noise.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FontNoise {
    pub probability: f64,
}

impl Default for FontNoise {
    fn default() -> Self {
        Self { probability: 0.1 }
    }
}

/// The page-context identity. Created once, never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdentityProfile {
    pub ua_noise: UaNoise,
    pub language_header: String,
    pub accept_header: String,
    pub canvas_shift: CanvasShift,
    pub screen_baseline: ScreenBaseline,
    pub private_ip: Ipv4Addr,
    pub font_noise: FontNoise,
}

/// The network-visible identity installed as request header rules.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeaderProfile {
    pub user_agent: String,
    pub accept_language: String,
    pub accept: String,
}

pub struct IdentityProfileGenerator;

impl IdentityProfileGenerator {
    /// Generate a profile from platform entropy.
    pub fn generate() -> IdentityProfile {
        Self::generate_with(&mut rand::thread_rng())
    }

    pub fn generate_with(rng: &mut impl Rng) -> IdentityProfile {
        IdentityProfile {
            ua_noise: UaNoise::random(rng),
            language_header: pick(LANGUAGE_HEADERS, rng).to_string(),
            accept_header: pick(ACCEPT_HEADERS, rng).to_string(),
            canvas_shift: CanvasShift::random(rng),
            screen_baseline: ScreenBaseline::default(),
            private_ip: Self::random_private_ip(rng),
            font_noise: FontNoise::default(),
        }
    }

    /// Draw a fresh header identity from the candidate sets.
    pub fn generate_headers() -> HeaderProfile {
        Self::generate_headers_with(&mut rand::thread_rng(), &UserAgentSource::Candidates, None)
    }

    /// Draw a fresh header identity.
    ///
    /// `native_user_agent` is only consulted for
    /// [`UserAgentSource::PerturbNative`]; without it the candidate list is
    /// used instead.
    pub fn generate_headers_with(
        rng: &mut impl Rng,
        source: &UserAgentSource,
        native_user_agent: Option<&str>,
    ) -> HeaderProfile {
        let user_agent = match (source, native_user_agent) {
            (UserAgentSource::PerturbNative, Some(native)) => {
                let noise = UaNoise::random(rng);
                perturb_user_agent(native, noise, rng)
            }
            _ => pick(USER_AGENTS, rng).to_string(),
        };
        HeaderProfile {
            user_agent,
            accept_language: pick(LANGUAGE_HEADERS, rng).to_string(),
            accept: pick(ACCEPT_HEADERS, rng).to_string(),
        }
    }

    /// Uniform range, then a uniform address inside it.
    pub fn random_private_ip(rng: &mut impl Rng) -> Ipv4Addr {
        let (network, prefix) = PRIVATE_RANGES[rng.gen_range(0..PRIVATE_RANGES.len())];
        let host_mask = u32::MAX >> prefix;
        let host = rng.gen::<u32>() & host_mask;
        Ipv4Addr::from(u32::from(network) | host)
    }
}

fn pick<'a>(candidates: &[&'a str], rng: &mut impl Rng) -> &'a str {
    candidates.choose(rng).copied().unwrap_or_default()
}

/// Perturb the first recognised browser version token of `user_agent`.
///
/// `Chrome/123.0` becomes e.g. `Chrome/121.57`. For noise levels of 3 and
/// above a short random suffix is sometimes appended as well. A User-Agent
/// without a known browser token is returned unchanged.
pub fn perturb_user_agent(user_agent: &str, noise: UaNoise, rng: &mut impl Rng) -> String {
    let mut perturbed = BROWSER_VERSION
        .replacen(user_agent, 1, |caps: &Captures| {
            let major: i64 = caps[2].parse().unwrap_or(i64::from(noise.min_major));
            let delta = if noise.level > 0 {
                i64::from(rng.gen_range(0..noise.level))
            } else {
                0
            };
            let shifted = if rng.gen_bool(0.5) { major + delta } else { major - delta };
            let final_major = shifted.max(i64::from(noise.min_major));
            format!("{}/{}.{}", &caps[1], final_major, rng.gen_range(0..100))
        })
        .into_owned();

    if perturbed != user_agent && noise.level >= 3 && rng.gen_bool(0.3) {
        let suffix: String = (0..noise.level)
            .map(|_| BASE36[rng.gen_range(0..BASE36.len())] as char)
            .collect();
        perturbed.push(' ');
        perturbed.push_str(&suffix);
    }
    perturbed
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_profile_fields_in_range() {
        let mut rng = StdRng::seed_from_u64(3);
        for _ in 0..200 {
            let profile = IdentityProfileGenerator::generate_with(&mut rng);
            for c in [profile.canvas_shift.r, profile.canvas_shift.g, profile.canvas_shift.b] {
                assert!((-5..=5).contains(&c));
            }
            assert!(LANGUAGE_HEADERS.contains(&profile.language_header.as_str()));
            assert!(ACCEPT_HEADERS.contains(&profile.accept_header.as_str()));
            assert!(profile.private_ip.is_private());
            assert!((1..=UaNoise::MAX_LEVEL).contains(&profile.ua_noise.level));
            assert_eq!(profile.screen_baseline, ScreenBaseline::default());
        }
    }

    #[test]
    fn test_private_ip_covers_all_ranges() {
        let mut rng = StdRng::seed_from_u64(11);
        let mut seen = [false; 3];
        for _ in 0..300 {
            let ip = IdentityProfileGenerator::random_private_ip(&mut rng);
            let octets = ip.octets();
            match octets[0] {
                10 => seen[0] = true,
                172 => {
                    assert!((16..=31).contains(&octets[1]), "{} outside 172.16/12", ip);
                    seen[1] = true;
                }
                192 => {
                    assert_eq!(octets[1], 168);
                    seen[2] = true;
                }
                _ => panic!("{} is not RFC1918", ip),
            }
        }
        assert_eq!(seen, [true; 3]);
    }

    #[test]
    fn test_canvas_shift_clamps() {
        let shift = CanvasShift { r: 5, g: -5, b: 3 };
        let mut pixel = [253u8, 2, 100, 77];
        shift.apply(&mut pixel);
        assert_eq!(pixel, [255, 0, 103, 77]);
    }

    #[test]
    fn test_headers_from_candidates() {
        let mut rng = StdRng::seed_from_u64(5);
        let headers =
            IdentityProfileGenerator::generate_headers_with(&mut rng, &UserAgentSource::Candidates, None);
        assert!(USER_AGENTS.contains(&headers.user_agent.as_str()));
        assert!(LANGUAGE_HEADERS.contains(&headers.accept_language.as_str()));
        assert!(ACCEPT_HEADERS.contains(&headers.accept.as_str()));
    }

    #[test]
    fn test_perturb_native_falls_back_without_native_ua() {
        let mut rng = StdRng::seed_from_u64(5);
        let headers = IdentityProfileGenerator::generate_headers_with(
            &mut rng,
            &UserAgentSource::PerturbNative,
            None,
        );
        assert!(USER_AGENTS.contains(&headers.user_agent.as_str()));
    }

    #[test]
    fn test_perturb_user_agent_bounds() {
        let ua = "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/123.0.0.0 Safari/537.36";
        let noise = UaNoise { level: 4, min_major: 70 };
        let mut rng = StdRng::seed_from_u64(9);
        for _ in 0..100 {
            let out = perturb_user_agent(ua, noise, &mut rng);
            let caps = BROWSER_VERSION.captures(&out).expect("version token kept");
            assert_eq!(&caps[1], "Chrome");
            let major: i64 = caps[2].parse().unwrap();
            assert!((120..=126).contains(&major), "major {} out of bounds", major);
            assert!(out.starts_with("Mozilla/5.0 (X11; Linux x86_64)"));
        }
    }

    #[test]
    fn test_perturb_user_agent_floors_major() {
        let noise = UaNoise { level: 4, min_major: 70 };
        let mut rng = StdRng::seed_from_u64(2);
        for _ in 0..50 {
            let out = perturb_user_agent("Firefox/60.0", noise, &mut rng);
            let caps = BROWSER_VERSION.captures(&out).unwrap();
            assert_eq!(&caps[2], "70");
        }
    }

    #[test]
    fn test_perturb_user_agent_unknown_browser() {
        let mut rng = StdRng::seed_from_u64(1);
        let noise = UaNoise { level: 4, min_major: 70 };
        assert_eq!(perturb_user_agent("curl/8.4.0", noise, &mut rng), "curl/8.4.0");
    }
}
