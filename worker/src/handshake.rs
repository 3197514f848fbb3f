use std::io;
use std::io::Write;

use ninebox_protocol::HandshakeMessage;

/// Writes the readiness handshake and flushes, so the host sees it without buffering delay.
pub fn announce_ready(out: &mut impl Write, port: u16) -> io::Result<()> {
    let line = HandshakeMessage::ready(port).to_line();
    out.write_all(line.as_bytes())?;
    out.write_all(b"\n")?;
    out.flush()
}
