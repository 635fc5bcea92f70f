use std::fs;
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::time::{Duration, Instant};

use super::process_state::ProcessStateProbe;
use super::{Layer, ProbeError};

/// L0: device presence (§4.4). Scans `/sys/bus/usb/devices` for an interface whose
/// `idVendor`/`idProduct` match the configured identity. Failure here is always
/// non-recoverable: no amount of restarting the child puts a USB dongle back in its socket.
pub struct DevicePresenceProbe {
    vendor_id: u16,
    product_id: u16,
    sysfs_root: std::path::PathBuf,
}

impl DevicePresenceProbe {
    pub fn new(vendor_id: u16, product_id: u16) -> Self {
        Self {
            vendor_id,
            product_id,
            sysfs_root: std::path::PathBuf::from("/sys/bus/usb/devices"),
        }
    }

    #[cfg(test)]
    pub fn with_sysfs_root(vendor_id: u16, product_id: u16, sysfs_root: std::path::PathBuf) -> Self {
        Self {
            vendor_id,
            product_id,
            sysfs_root,
        }
    }

    fn read_hex_id(path: &std::path::Path) -> Option<u16> {
        let contents = fs::read_to_string(path).ok()?;
        u16::from_str_radix(contents.trim(), 16).ok()
    }

    pub fn check(&self) -> Result<(), ProbeError> {
        let entries = match fs::read_dir(&self.sysfs_root) {
            Ok(entries) => entries,
            Err(e) => {
                return Err(ProbeError {
                    layer: Layer::L0DevicePresence,
                    recoverable: false,
                    message: format!("reading {}: {e}", self.sysfs_root.display()),
                })
            }
        };

        for entry in entries.flatten() {
            let dir = entry.path();
            let vendor = Self::read_hex_id(&dir.join("idVendor"));
            let product = Self::read_hex_id(&dir.join("idProduct"));
            if vendor == Some(self.vendor_id) && product == Some(self.product_id) {
                return Ok(());
            }
        }

        Err(ProbeError {
            layer: Layer::L0DevicePresence,
            recoverable: false,
            message: format!(
                "usb device {:04x}:{:04x} not enumerated",
                self.vendor_id, self.product_id
            ),
        })
    }
}

/// L2: transport (§4.4). A bare TCP connect to the child's advertised port, with its own
/// bound timeout so a wedged listen queue cannot stall the watchdog beyond the configured
/// budget.
pub struct TransportProbe {
    addr: SocketAddr,
}

impl TransportProbe {
    pub fn new(addr: SocketAddr) -> Self {
        Self { addr }
    }

    pub fn check(&self, timeout: Duration) -> Result<(), ProbeError> {
        TcpStream::connect_timeout(&self.addr, timeout)
            .map(|_| ())
            .map_err(|e| ProbeError {
                layer: Layer::L2Transport,
                recoverable: true,
                message: format!("connecting to {}: {e}", self.addr),
            })
    }
}

/// L3: application handshake (§4.4, §6). A single request/response round-trip on the same
/// TCP connection used for control. The bytes are dictated entirely by the child's wire
/// protocol; this probe only compares the response against what it was told to expect, it
/// never interprets the KNX protocol itself.
pub struct HandshakeProbe {
    addr: SocketAddr,
    request: Vec<u8>,
    expected_response: Vec<u8>,
}

impl HandshakeProbe {
    pub fn new(addr: SocketAddr, request: Vec<u8>, expected_response: Vec<u8>) -> Self {
        Self {
            addr,
            request,
            expected_response,
        }
    }

    /// The KNX handshake from §6: a 7-byte request expecting a 4-byte echo on success.
    pub fn knx(addr: SocketAddr) -> Self {
        Self::new(
            addr,
            vec![0x00, 0x05, 0x00, 0x22, 0x00, 0x00, 0xFF],
            vec![0x00, 0x02, 0x00, 0x22],
        )
    }

    pub fn check(&self, timeout: Duration) -> Result<(), ProbeError> {
        let fail = |message: String| ProbeError {
            layer: Layer::L3Handshake,
            recoverable: true,
            message,
        };

        let mut stream =
            TcpStream::connect_timeout(&self.addr, timeout).map_err(|e| fail(format!("connecting: {e}")))?;
        stream
            .set_read_timeout(Some(timeout))
            .map_err(|e| fail(format!("setting read timeout: {e}")))?;
        stream
            .set_write_timeout(Some(timeout))
            .map_err(|e| fail(format!("setting write timeout: {e}")))?;

        stream
            .write_all(&self.request)
            .map_err(|e| fail(format!("writing handshake request: {e}")))?;

        let mut response = vec![0u8; self.expected_response.len()];
        stream
            .read_exact(&mut response)
            .map_err(|e| fail(format!("reading handshake response: {e}")))?;

        if response == self.expected_response {
            Ok(())
        } else {
            Err(fail(format!(
                "unexpected handshake response: {response:02x?}"
            )))
        }
    }
}

/// L4: bus round-trip (§4.4, §4.5), optional. Reads against a known-good device on the bus
/// within a caller-supplied timeout. The bus protocol itself is out of scope (non-goal, §1);
/// this crate only invokes whatever the host process hands it and times the result.
pub trait BusProbe: Send {
    fn read_known_good_device(&mut self, timeout: Duration) -> Result<(), String>;
}

/// Wraps a host-supplied [`BusProbe`] behind the same `check`-returns-`ProbeError` shape as the
/// other layers, tagging every failure L4 and recoverable.
pub struct BusRoundTripProbe {
    inner: Box<dyn BusProbe>,
}

impl BusRoundTripProbe {
    pub fn new(inner: Box<dyn BusProbe>) -> Self {
        Self { inner }
    }

    pub fn check(&mut self, timeout: Duration) -> Result<(), ProbeError> {
        let start = Instant::now();
        self.inner
            .read_known_good_device(timeout)
            .map_err(|message| ProbeError {
                layer: Layer::L4BusRoundTrip,
                recoverable: true,
                message: format!("bus round-trip after {:?}: {message}", start.elapsed()),
            })
    }
}

/// Composes L0-L4 behind the single [`super::HealthProbe`] callable the watchdog invokes,
/// short-circuiting on first failure (§4.4, §9: "a single function that internally chains the
/// checks"). Each layer is optional except L1, which always runs against the supervised pid.
pub struct LayeredProbe {
    device_presence: Option<DevicePresenceProbe>,
    process_state: ProcessStateProbe,
    transport: Option<TransportProbe>,
    handshake: Option<HandshakeProbe>,
    bus: Option<BusRoundTripProbe>,
}

impl LayeredProbe {
    pub fn new(process_state: ProcessStateProbe) -> Self {
        Self {
            device_presence: None,
            process_state,
            transport: None,
            handshake: None,
            bus: None,
        }
    }

    pub fn with_device_presence(mut self, probe: DevicePresenceProbe) -> Self {
        self.device_presence = Some(probe);
        self
    }

    pub fn with_transport(mut self, probe: TransportProbe) -> Self {
        self.transport = Some(probe);
        self
    }

    pub fn with_handshake(mut self, probe: HandshakeProbe) -> Self {
        self.handshake = Some(probe);
        self
    }

    pub fn with_bus(mut self, probe: BusRoundTripProbe) -> Self {
        self.bus = Some(probe);
        self
    }

    /// Whether the last failure returned by [`check`](Self::check) was an L4 bus failure, for
    /// callers implementing `resetOnBusFailure` (§4.5) who need to react before the 3-strike
    /// watchdog threshold.
    pub fn is_bus_layer(err: &ProbeError) -> bool {
        err.layer == Layer::L4BusRoundTrip
    }
}

impl super::HealthProbe for LayeredProbe {
    fn check(&mut self, pid: u32, timeout: Duration) -> Result<(), ProbeError> {
        if let Some(probe) = &self.device_presence {
            probe.check()?;
        }

        self.process_state.check(pid)?;

        if let Some(probe) = &self.transport {
            probe.check(timeout)?;
        }

        if let Some(probe) = &self.handshake {
            probe.check(timeout)?;
        }

        if let Some(probe) = &mut self.bus {
            probe.check(timeout)?;
        }

        Ok(())
    }
}
