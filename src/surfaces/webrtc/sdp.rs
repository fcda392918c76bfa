//! Session description rewriting.
//!
//! Passes over the SDP text:
//! - IPv4 addresses following `IP4 ` (`o=`, `c=`, `a=rtcp`) and every IPv4
//!   address on `a=candidate` lines (connection address and `raddr`) are
//!   replaced according to the [`AddressPolicy`]
//! - `a=rtpmap` clock rates receive up to ±5% noise

use std::net::Ipv4Addr;
use std::sync::LazyLock;

use rand::Rng;
use regex::{Captures, Regex};

static IP4_ADDRESS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"IP4 (\d+\.\d+\.\d+\.\d+)").expect("valid IP4 pattern"));

static CANDIDATE_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^a=candidate:[^\r\n]*").expect("valid candidate pattern"));

static DOTTED_QUAD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b\d{1,3}\.\d{1,3}\.\d{1,3}\.\d{1,3}\b").expect("valid address pattern"));

static RTPMAP: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"a=rtpmap:(\d+) ([\w-]+)/(\d+)").expect("valid rtpmap pattern"));

/// Lowest clock rate a rewritten rtpmap may carry.
pub const MIN_SAMPLE_RATE: u32 = 8000;

/// Relative bound for clock-rate noise.
pub const RATE_NOISE: f64 = 0.05;

/// How addresses in the description are treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressPolicy {
    /// Replace every address that could identify the host with this one.
    Substitute(Ipv4Addr),
    /// Replace every address with `0.0.0.0`.
    RemoveAll,
}

/// Addresses that are left in place under [`AddressPolicy::Substitute`]:
/// RFC1918, loopback and the unspecified address.
pub fn is_shielded(addr: Ipv4Addr) -> bool {
    addr.is_private() || addr.is_loopback() || addr.is_unspecified()
}

/// Apply `±5%` noise to a clock rate, never dropping below 8000 Hz.
pub fn jitter_sample_rate(base: u32, rng: &mut impl Rng) -> u32 {
    let base = f64::from(base);
    let delta = (base * RATE_NOISE * (rng.gen::<f64>() * 2.0 - 1.0)).trunc();
    ((base + delta) as u32).max(MIN_SAMPLE_RATE)
}

#[derive(Debug, Clone, Copy)]
pub struct SdpRewriter {
    policy: AddressPolicy,
    rate_noise: bool,
}

impl SdpRewriter {
    pub fn new(policy: AddressPolicy, rate_noise: bool) -> Self {
        Self { policy, rate_noise }
    }

    /// The address to report in place of `address`.
    fn mask(&self, address: &str) -> String {
        match self.policy {
            AddressPolicy::RemoveAll => Ipv4Addr::UNSPECIFIED.to_string(),
            AddressPolicy::Substitute(decoy) => match address.parse::<Ipv4Addr>() {
                Ok(addr) if is_shielded(addr) => address.to_string(),
                // Unparseable octets are treated as identifying
                _ => decoy.to_string(),
            },
        }
    }

    pub fn rewrite(&self, sdp: &str, rng: &mut impl Rng) -> String {
        let addressed = IP4_ADDRESS.replace_all(sdp, |caps: &Captures| format!("IP4 {}", self.mask(&caps[1])));
        let addressed = CANDIDATE_LINE.replace_all(&addressed, |line: &Captures| {
            DOTTED_QUAD
                .replace_all(&line[0], |addr: &Captures| self.mask(&addr[0]))
                .into_owned()
        });

        if !self.rate_noise {
            return addressed.into_owned();
        }
        RTPMAP
            .replace_all(&addressed, |caps: &Captures| match caps[3].parse::<u32>() {
                Ok(rate) => format!("a=rtpmap:{} {}/{}", &caps[1], &caps[2], jitter_sample_rate(rate, rng)),
                Err(_) => caps[0].to_string(),
            })
            .into_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    const OFFER: &str = "v=0\r\n\
o=- 4611731400430051336 2 IN IP4 127.0.0.1\r\n\
s=-\r\n\
c=IN IP4 203.0.113.7\r\n\
a=rtpmap:111 opus/48000/2\r\n\
a=rtpmap:0 PCMU/8000\r\n\
a=rtpmap:96 VP8/90000\r\n\
a=rtcp:9 IN IP4 192.168.1.20\r\n";

    const DECOY: Ipv4Addr = Ipv4Addr::new(10, 1, 2, 3);

    fn rng() -> StdRng {
        StdRng::seed_from_u64(77)
    }

    fn rate_of(sdp: &str, payload: &str) -> u32 {
        let caps = RTPMAP
            .captures_iter(sdp)
            .find(|c| &c[1] == payload)
            .expect("payload present");
        caps[3].parse().unwrap()
    }

    #[test]
    fn test_public_address_replaced() {
        let out = SdpRewriter::new(AddressPolicy::Substitute(DECOY), false).rewrite(OFFER, &mut rng());
        assert!(out.contains("c=IN IP4 10.1.2.3\r\n"));
        assert!(!out.contains("203.0.113.7"));
    }

    #[test]
    fn test_private_and_loopback_pass_through() {
        let out = SdpRewriter::new(AddressPolicy::Substitute(DECOY), false).rewrite(OFFER, &mut rng());
        assert!(out.contains("IN IP4 127.0.0.1"));
        assert!(out.contains("IN IP4 192.168.1.20"));
    }

    #[test]
    fn test_candidate_addresses_replaced() {
        let sdp = "c=IN IP4 203.0.113.5\r\n\
a=candidate:842163049 1 udp 1677729535 203.0.113.5 52000 typ srflx raddr 192.168.1.5 rport 52000\r\n\
a=candidate:1 1 udp 2122260223 198.51.100.9 52001 typ host generation 0\r\n";
        let out = SdpRewriter::new(AddressPolicy::Substitute(DECOY), false).rewrite(sdp, &mut rng());

        assert!(!out.contains("203.0.113.5"));
        assert!(!out.contains("198.51.100.9"));
        assert!(out.contains("udp 1677729535 10.1.2.3 52000 typ srflx raddr 192.168.1.5 rport 52000"));
        assert!(out.contains("udp 2122260223 10.1.2.3 52001 typ host"));
        // Foundation, priority and ports are untouched
        assert!(out.contains("a=candidate:842163049 1 udp"));
    }

    #[test]
    fn test_candidate_addresses_removed() {
        let sdp = "a=candidate:842163049 1 udp 1677729535 203.0.113.5 52000 typ srflx raddr 192.168.1.5 rport 52000\r\n";
        let out = SdpRewriter::new(AddressPolicy::RemoveAll, false).rewrite(sdp, &mut rng());
        assert_eq!(
            out,
            "a=candidate:842163049 1 udp 1677729535 0.0.0.0 52000 typ srflx raddr 0.0.0.0 rport 52000\r\n"
        );
    }

    #[test]
    fn test_shielded_ranges() {
        assert!(is_shielded("10.200.1.1".parse().unwrap()));
        assert!(is_shielded("172.31.255.1".parse().unwrap()));
        assert!(is_shielded("0.0.0.0".parse().unwrap()));
        // Outside 172.16/12 even though it starts with 172.
        assert!(!is_shielded("172.32.0.1".parse().unwrap()));
        assert!(!is_shielded("8.8.8.8".parse().unwrap()));
    }

    #[test]
    fn test_unparseable_address_replaced() {
        let out = SdpRewriter::new(AddressPolicy::Substitute(DECOY), false)
            .rewrite("c=IN IP4 999.1.1.1\r\n", &mut rng());
        assert_eq!(out, "c=IN IP4 10.1.2.3\r\n");
    }

    #[test]
    fn test_remove_all() {
        let out = SdpRewriter::new(AddressPolicy::RemoveAll, false).rewrite(OFFER, &mut rng());
        assert_eq!(out.matches("IP4 0.0.0.0").count(), 3);
        assert!(!out.contains("127.0.0.1"));
    }

    #[test]
    fn test_rtpmap_noise_bounds() {
        let rewriter = SdpRewriter::new(AddressPolicy::Substitute(DECOY), true);
        let mut rng = rng();
        for _ in 0..200 {
            let out = rewriter.rewrite(OFFER, &mut rng);
            let opus = rate_of(&out, "111");
            assert!((45_600..=50_400).contains(&opus), "opus rate {}", opus);
            let vp8 = rate_of(&out, "96");
            assert!((85_500..=94_500).contains(&vp8), "vp8 rate {}", vp8);
            assert!(rate_of(&out, "0") >= MIN_SAMPLE_RATE);
            // Channel count survives
            assert!(out.contains(&format!("a=rtpmap:111 opus/{}/2", opus)));
        }
    }

    #[test]
    fn test_rate_floor() {
        let mut rng = rng();
        for _ in 0..100 {
            assert!(jitter_sample_rate(8000, &mut rng) >= MIN_SAMPLE_RATE);
        }
    }

    #[test]
    fn test_no_noise_keeps_rates() {
        let out = SdpRewriter::new(AddressPolicy::Substitute(DECOY), false).rewrite(OFFER, &mut rng());
        assert!(out.contains("a=rtpmap:111 opus/48000/2"));
        assert!(out.contains("a=rtpmap:96 VP8/90000"));
    }
}
