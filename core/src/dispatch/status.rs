//! Stop-reply formatting (spec §4.5 table, component C9).

/// Signal numbers the bridge reports, matching spec §6.
pub mod signal {
    pub const SIGHUP: u8 = 1;
    pub const SIGINT: u8 = 2;
    pub const SIGTRAP: u8 = 5;
}

fn hex_byte(b: u8) -> String {
    let [hi, lo] = avrbridge_hex::encode_byte(b);
    format!("{}{}", hi as char, lo as char)
}

/// Minimal stop reply: `S<sig>`.
#[must_use]
pub fn simple(sig: u8) -> String {
    format!("S{}", hex_byte(sig))
}

/// Full stop reply carrying SREG, SP, and PC: `T<sig>20:<sreg>;21:<sp
/// lo><sp hi>;22:<pc[0..3]>;` (spec §6). `pc` and `sp` are encoded
/// little-endian, matching the `g` reply's register layout.
#[must_use]
pub fn extended(sig: u8, sreg: u8, sp: u16, pc: u32) -> String {
    let sp = sp.to_le_bytes();
    let pc = pc.to_le_bytes();
    format!(
        "T{sig}20:{sreg};21:{sp0}{sp1};22:{pc0}{pc1}{pc2}{pc3};",
        sig = hex_byte(sig),
        sreg = hex_byte(sreg),
        sp0 = hex_byte(sp[0]),
        sp1 = hex_byte(sp[1]),
        pc0 = hex_byte(pc[0]),
        pc1 = hex_byte(pc[1]),
        pc2 = hex_byte(pc[2]),
        pc3 = hex_byte(pc[3]),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn simple_trap_is_s05() {
        assert_eq!(simple(signal::SIGTRAP), "S05");
    }

    #[test]
    fn extended_matches_register_read_layout() {
        let reply = extended(signal::SIGTRAP, 0x00, 0x08ff, 0x100);
        assert_eq!(reply, "T0520:00;21:ff08;22:00010000;");
    }
}
