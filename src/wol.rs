use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

use thiserror::Error;
use tokio::net::UdpSocket;

/// Ports a Wake-on-LAN frame is commonly listened on. Both are tried;
/// the send counts as successful if at least one datagram went out.
const WOL_PORTS: [u16; 2] = [9, 7];

#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid hardware address {0:?}: expected six hex octet pairs")]
pub struct MacParseError(pub String);

/// A six-octet hardware address.
///
/// Accepts colon- or hyphen-delimited hex pairs in any case; displays
/// in the canonical lower-cased, hyphen-delimited form.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HardwareAddress([u8; 6]);

impl FromStr for HardwareAddress {
    type Err = MacParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let hex: String = s.chars().filter(|c| c.is_ascii_hexdigit()).collect();
        let separators = s.chars().filter(|c| !c.is_ascii_hexdigit()).count();
        // Six pairs and nothing but pair separators between them.
        if hex.len() != 12 || separators > 5 {
            return Err(MacParseError(s.to_string()));
        }
        let mut out = [0u8; 6];
        for (i, byte) in out.iter_mut().enumerate() {
            *byte = u8::from_str_radix(&hex[i * 2..i * 2 + 2], 16)
                .map_err(|_| MacParseError(s.to_string()))?;
        }
        Ok(Self(out))
    }
}

impl fmt::Display for HardwareAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let o = &self.0;
        write!(
            f,
            "{:02x}-{:02x}-{:02x}-{:02x}-{:02x}-{:02x}",
            o[0], o[1], o[2], o[3], o[4], o[5]
        )
    }
}

/// Builds the 102-byte magic packet: 6 x 0xFF followed by the target
/// address repeated 16 times.
pub fn magic_packet(mac: &HardwareAddress) -> [u8; 102] {
    let mut pkt = [0u8; 102];
    pkt[..6].fill(0xFF);
    for i in 0..16 {
        let base = 6 + i * 6;
        pkt[base..base + 6].copy_from_slice(&mac.0);
    }
    pkt
}

/// Capability contract for waking a node by hardware address.
pub trait WolSender {
    async fn wake(&self, mac: &HardwareAddress) -> std::io::Result<()>;
}

/// Sends the magic packet as a UDP broadcast.
pub struct UdpWol;

impl WolSender for UdpWol {
    async fn wake(&self, mac: &HardwareAddress) -> std::io::Result<()> {
        let pkt = magic_packet(mac);
        let sock = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).await?;
        sock.set_broadcast(true)?;

        let mut sent = false;
        let mut last_err = None;
        for port in WOL_PORTS {
            match sock.send_to(&pkt, (Ipv4Addr::BROADCAST, port)).await {
                Ok(_) => sent = true,
                Err(e) => {
                    tracing::debug!("WOL send to port {} failed: {}", port, e);
                    last_err = Some(e);
                }
            }
        }
        match (sent, last_err) {
            (true, _) => Ok(()),
            (false, Some(e)) => Err(e),
            (false, None) => unreachable!("no ports attempted"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_colon_and_hyphen_forms() {
        let a: HardwareAddress = "AA:BB:CC:DD:EE:FF".parse().unwrap();
        let b: HardwareAddress = "aa-bb-cc-dd-ee-ff".parse().unwrap();
        assert_eq!(a, b);
        assert_eq!(a.to_string(), "aa-bb-cc-dd-ee-ff");
    }

    #[test]
    fn rejects_short_and_garbage_addresses() {
        assert!("aa:bb:cc:dd:ee".parse::<HardwareAddress>().is_err());
        assert!("not a mac".parse::<HardwareAddress>().is_err());
        assert!("".parse::<HardwareAddress>().is_err());
        assert!(
            "aa:bb:cc:dd:ee:ff:00".parse::<HardwareAddress>().is_err(),
            "seven octets must not parse"
        );
    }

    #[test]
    fn magic_packet_layout() {
        let mac: HardwareAddress = "01-02-03-04-05-06".parse().unwrap();
        let pkt = magic_packet(&mac);
        assert_eq!(&pkt[..6], &[0xFF; 6]);
        for i in 0..16 {
            let base = 6 + i * 6;
            assert_eq!(&pkt[base..base + 6], &[1, 2, 3, 4, 5, 6]);
        }
    }
}
