//! # Management Bus Client
//!
//! Talks to the IPMB relay daemon that forwards requests to a companion
//! controller on the management bus.
//!
//! Requests and responses are single Unix datagrams:
//!
//! - **Request**: `[target address, netfn << 2, cmd, payload...]`
//! - **Response**: `[(netfn | 1) << 2, cmd, completion code, data...]`
//!
//! The relay answers on the socket the request came from, so every client
//! binds its own socket (`asd-jtag-<pid>.sock`) next to the relay's
//! `ipmb_<bus>.sock`. The client socket file is removed on [`Drop`].
use std::{
    fs, io,
    os::unix::net::UnixDatagram,
    path::{Path, PathBuf},
};

const MAX_DATAGRAM: usize = 512;

/// A request/response channel to a controller on the management bus.
pub trait ManagementBus {
    /// Sends one request and blocks until the matching response arrives.
    /// Returns the response body starting at the completion code.
    fn exchange(&mut self, netfn: u8, cmd: u8, payload: &[u8]) -> io::Result<Vec<u8>>;
}

/// Builds the request datagram.
pub fn encode_request(target: u8, netfn: u8, cmd: u8, payload: &[u8]) -> Vec<u8> {
    let mut datagram = Vec::with_capacity(3 + payload.len());
    datagram.push(target);
    datagram.push(netfn << 2);
    datagram.push(cmd);
    datagram.extend_from_slice(payload);
    datagram
}

/// Checks the response header and returns the body.
pub fn decode_response(netfn: u8, cmd: u8, datagram: &[u8]) -> io::Result<&[u8]> {
    if datagram.len() < 3 {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("Response of {} bytes is too short", datagram.len()),
        ));
    }
    if datagram[0] != (netfn | 1) << 2 || datagram[1] != cmd {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!(
                "Response header {:02x?} does not match netfn 0x{:02x} cmd 0x{:02x}",
                &datagram[..2],
                netfn,
                cmd
            ),
        ));
    }
    Ok(&datagram[2..])
}

/// Management-bus client over the relay daemon's Unix datagram socket.
pub struct IpmbClient {
    socket: UnixDatagram,
    local_path: PathBuf,
    relay_path: PathBuf,
    target: u8,
}

impl IpmbClient {
    pub fn new(relay_dir: impl AsRef<Path>, bus: u8, target: u8) -> io::Result<IpmbClient> {
        let relay_dir = relay_dir.as_ref();
        let relay_path = relay_dir.join(format!("ipmb_{}.sock", bus));
        let local_path = relay_dir.join(format!("asd-jtag-{}.sock", std::process::id()));
        // A previous instance with the same pid may have died without cleanup
        match fs::remove_file(&local_path) {
            Err(e) if e.kind() != io::ErrorKind::NotFound => return Err(e),
            _ => {}
        }
        log::debug!(
            "Binding management bus client {} for relay {}",
            local_path.display(),
            relay_path.display()
        );
        let socket = UnixDatagram::bind(&local_path)?;
        Ok(IpmbClient {
            socket,
            local_path,
            relay_path,
            target,
        })
    }
}

impl ManagementBus for IpmbClient {
    fn exchange(&mut self, netfn: u8, cmd: u8, payload: &[u8]) -> io::Result<Vec<u8>> {
        let request = encode_request(self.target, netfn, cmd, payload);
        log::trace!("IPMB request: {:02x?}", request);
        self.socket.send_to(&request, &self.relay_path)?;

        let mut buf = [0u8; MAX_DATAGRAM];
        let len = self.socket.recv(&mut buf)?;
        log::trace!("IPMB response: {:02x?}", &buf[..len]);
        decode_response(netfn, cmd, &buf[..len]).map(<[u8]>::to_vec)
    }
}

impl Drop for IpmbClient {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.local_path) {
            log::debug!(
                "Could not remove {}: {}",
                self.local_path.display(),
                e
            );
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::thread;

    #[test]
    fn request_header() {
        assert_eq!(
            encode_request(0x40, 0x38, 0x22, &[1, 2]),
            vec![0x40, 0xe0, 0x22, 1, 2]
        );
    }

    #[test]
    fn response_header_must_match() {
        assert_eq!(
            decode_response(0x38, 0x22, &[0xe4, 0x22, 0x00, 0x9c]).unwrap(),
            &[0x00, 0x9c]
        );
        assert!(decode_response(0x38, 0x22, &[0xe4, 0x21, 0x00]).is_err());
        assert!(decode_response(0x38, 0x22, &[0xe4]).is_err());
    }

    #[test]
    fn exchanges_through_relay_socket() {
        let dir = std::env::temp_dir().join(format!("asd-jtag-bus-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        let relay = UnixDatagram::bind(dir.join("ipmb_3.sock")).unwrap();

        let relay_thread = thread::spawn(move || {
            let mut buf = [0u8; 64];
            let (len, peer) = relay.recv_from(&mut buf).unwrap();
            assert_eq!(&buf[..len], &[0x20, 0xe0, 0x28, 0x9c, 0x9c, 0x00]);
            let peer = peer.as_pathname().unwrap().to_path_buf();
            relay
                .send_to(&[0xe4, 0x28, 0x00, 0x9c, 0x9c, 0x00], peer)
                .unwrap();
        });

        let mut client = IpmbClient::new(&dir, 3, 0x20).unwrap();
        let body = client.exchange(0x38, 0x28, &[0x9c, 0x9c, 0x00]).unwrap();
        assert_eq!(body, vec![0x00, 0x9c, 0x9c, 0x00]);
        relay_thread.join().unwrap();

        let local = client.local_path.clone();
        drop(client);
        assert!(!local.exists());
        fs::remove_dir_all(&dir).unwrap();
    }
}
