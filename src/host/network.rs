//! Network collaborators backed by the host's own network stack.
//!
//! Joining networks and running an access point are the operating system's
//! job on a host, so both are reduced to state bookkeeping and log lines.

use crate::{
    board::{AccessPoint, WifiStation},
    state::ConnectionState,
};
use anyhow::Result;
use log::{debug, info};
use std::net::{IpAddr, Ipv4Addr, UdpSocket};

/// Address used to select the outgoing interface, nothing is sent to it.
const PROBE_ADDRESS: (Ipv4Addr, u16) = (Ipv4Addr::new(192, 0, 2, 1), 9);

#[derive(Clone, Copy, Debug, Default)]
pub struct HostStation;

impl WifiStation for HostStation {
    fn connect(&mut self, ssid: &str, _password: &str) -> Result<()> {
        info!("network {ssid} is managed by the host, using the current connection");
        Ok(())
    }

    fn status(&mut self) -> ConnectionState {
        match self.address() {
            Some(_) => ConnectionState::Connected,
            None => ConnectionState::Disconnected,
        }
    }

    fn disconnect(&mut self) {
        debug!("disconnect ignored on host");
    }

    /// Source address the host would route outgoing traffic from.
    fn address(&self) -> Option<IpAddr> {
        let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).ok()?;
        socket.connect(PROBE_ADDRESS).ok()?;
        socket
            .local_addr()
            .ok()
            .map(|address| address.ip())
            .filter(|ip| !ip.is_unspecified())
    }
}

#[derive(Clone, Debug, Default)]
pub struct HostAccessPoint {
    active: bool,
}

impl AccessPoint for HostAccessPoint {
    fn activate(&mut self, ssid: &str, _password: &str) -> Result<()> {
        info!("access point {ssid} simulated, portal is reachable on this host");
        self.active = true;
        Ok(())
    }

    fn is_active(&self) -> bool {
        self.active
    }

    fn configure(&mut self, address: Ipv4Addr, netmask: Ipv4Addr) -> Result<()> {
        debug!("access point address {address}/{netmask} not applied on host");
        Ok(())
    }

    fn deactivate(&mut self) {
        self.active = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn access_point_tracks_activation() {
        let mut ap = HostAccessPoint::default();
        assert!(!ap.is_active());

        ap.activate("Tronbyt-Setup", "setup1234").expect("activate");
        assert!(ap.is_active());
        ap.configure(Ipv4Addr::new(192, 168, 4, 1), Ipv4Addr::new(255, 255, 255, 0))
            .expect("configure");

        ap.deactivate();
        assert!(!ap.is_active());
    }

    #[test]
    fn station_status_matches_address() {
        let mut station = HostStation;
        station.connect("home", "secret").expect("connect");

        let expected = match station.address() {
            Some(_) => ConnectionState::Connected,
            None => ConnectionState::Disconnected,
        };
        assert_eq!(station.status(), expected);
    }
}
