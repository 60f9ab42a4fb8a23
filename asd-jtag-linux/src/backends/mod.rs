pub mod kernel_driver;
pub mod legacy;
pub mod remote;

/// One TCK clock as exchanged with the bit-bang ioctls of both JTAG drivers.
#[repr(C, packed)]
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct TckBitbang {
    pub tms: u8,
    pub tdi: u8,
    pub tdo: u8,
}

/// Expands TMS values into one clock each, with TDI held low.
pub fn tck_sequence(tms: impl IntoIterator<Item = bool>) -> Vec<TckBitbang> {
    tms.into_iter()
        .map(|tms| TckBitbang {
            tms: tms as u8,
            tdi: 0,
            tdo: 0,
        })
        .collect()
}

#[test]
fn tck_sequence_follows_tms() {
    let clocks = tck_sequence([true, false, true]);
    assert_eq!(
        clocks.iter().map(|c| c.tms).collect::<Vec<_>>(),
        vec![1, 0, 1]
    );
    assert!(clocks.iter().all(|c| c.tdi == 0));
}
