//! mDNS service advertisement and browsing, thin wrapper over `mdns-sd`.

use std::collections::HashMap;

use mdns_sd::{ServiceDaemon, ServiceEvent, ServiceInfo};
use rootstream_protocol::{
    MDNS_SERVICE_TYPE, MDNS_TXT_BANDWIDTH, MDNS_TXT_CAPABILITY, MDNS_TXT_CODE, MDNS_TXT_MAX_PEERS,
    MDNS_TXT_VERSION,
};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MdnsError {
    #[error("mdns daemon error: {0}")]
    Daemon(#[from] mdns_sd::Error),
}

pub struct MdnsAdvertiser {
    daemon: ServiceDaemon,
    fullname: String,
}

impl MdnsAdvertiser {
    pub fn announce(
        hostname: &str,
        port: u16,
        peer_code: &str,
        capability: &str,
        max_peers: u32,
        bandwidth_kbps: u32,
    ) -> Result<Self, MdnsError> {
        let daemon = ServiceDaemon::new()?;
        let instance_name = hostname;

        let mut txt = HashMap::new();
        txt.insert(MDNS_TXT_VERSION.to_string(), "1".to_string());
        txt.insert(MDNS_TXT_CODE.to_string(), peer_code.to_string());
        txt.insert(MDNS_TXT_CAPABILITY.to_string(), capability.to_string());
        txt.insert(MDNS_TXT_MAX_PEERS.to_string(), max_peers.to_string());
        txt.insert(MDNS_TXT_BANDWIDTH.to_string(), bandwidth_kbps.to_string());

        let service = ServiceInfo::new(
            MDNS_SERVICE_TYPE,
            instance_name,
            &format!("{hostname}.local."),
            "",
            port,
            txt,
        )?
        .enable_addr_auto();

        let fullname = service.get_fullname().to_string();
        daemon.register(service)?;
        Ok(Self { daemon, fullname })
    }

    pub fn stop(self) -> Result<(), MdnsError> {
        self.daemon.unregister(&self.fullname)?;
        Ok(())
    }
}

pub struct MdnsBrowser {
    daemon: ServiceDaemon,
    receiver: mdns_sd::Receiver<ServiceEvent>,
}

#[derive(Debug, Clone)]
pub struct DiscoveredService {
    pub hostname: String,
    pub port: u16,
    pub peer_code: Option<String>,
    pub capability: Option<String>,
}

impl MdnsBrowser {
    pub fn browse() -> Result<Self, MdnsError> {
        let daemon = ServiceDaemon::new()?;
        let receiver = daemon.browse(MDNS_SERVICE_TYPE)?;
        Ok(Self { daemon, receiver })
    }

    /// Drains any pending events without blocking, returning the
    /// resolved services seen so far.
    pub fn poll(&self) -> Vec<DiscoveredService> {
        let mut found = Vec::new();
        while let Ok(event) = self.receiver.try_recv() {
            if let ServiceEvent::ServiceResolved(info) = event {
                found.push(DiscoveredService {
                    hostname: info.get_hostname().trim_end_matches('.').to_string(),
                    port: info.get_port(),
                    peer_code: info.get_property_val_str(MDNS_TXT_CODE).map(str::to_string),
                    capability: info
                        .get_property_val_str(MDNS_TXT_CAPABILITY)
                        .map(str::to_string),
                });
            }
        }
        found
    }

    pub fn stop(self) -> Result<(), MdnsError> {
        self.daemon.stop_browse(MDNS_SERVICE_TYPE)?;
        Ok(())
    }
}
