//! Decoder for the BerryMed "BCI" pulse-oximeter packet format.
//!
//! BerryMed oximeters (BM1000C and friends) stream 5-byte packets over a
//! transparent UART at 115200 baud:
//!
//! ```text
//! byte 0  header   bit7=1 sync marker, bit6 pulse beep, bit5 probe
//!                  unplugged, bit4 sensor signal present, bits3-0 sensor
//!                  signal strength
//! byte 1  data[0]  plethysmograph amplitude, 0-255
//! byte 2  data[1]  bit6 pulse-rate high bit, bit5 pulse search,
//!                  bit4 finger absent, bits3-0 bar graph
//! byte 3  data[2]  pulse-rate low 8 bits
//! byte 4  data[3]  SpO2, 0-100, 127 when the reading is invalid
//! ```
//!
//! Only the sync bit, pleth, finger flag, pulse rate, and SpO2 are decoded;
//! the remaining header and status bits are dropped.

use serde::{Deserialize, Serialize};

use crate::ByteSource;

/// Header bit marking the first byte of a packet.
const SYNC: u8 = 0x80;

/// data[1] bit set while no finger is on the probe.
const FINGER_ABSENT: u8 = 0x10;

/// data[1] bit carrying bit 7 of the pulse rate.
const PULSE_RATE_HIGH: u8 = 0x40;

/// SpO2 sentinel reported while the sensor has no valid reading.
const SPO2_INVALID: u8 = 127;

/// One decoded measurement.
///
/// A plain snapshot; the device emits a fresh one roughly every 20 ms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PulseOximeterValues {
    /// False while the sensor reports the SpO2 invalid sentinel.
    pub valid: bool,
    /// Blood-oxygen saturation in percent, 0-100. 127 when invalid.
    pub spo2: u8,
    /// Pulse rate in beats per minute. 255 is the device's invalid marker.
    pub pulse_rate: u8,
    /// Plethysmograph amplitude. Documented by the vendor as 0-100 but
    /// transported as a full byte, so 0-255 here.
    pub pleth: u8,
    /// True when a finger is detected on the probe.
    pub finger_present: bool,
}

/// Frame decoder over a non-blocking byte source.
///
/// Stateless between calls: every [`values`](Self::values) call hunts for a
/// sync byte on its own, so a stream joined mid-packet realigns after at
/// most a few polls.
pub struct PulseOximeter<S> {
    source: S,
}

impl<S: ByteSource> PulseOximeter<S> {
    pub fn new(source: S) -> Self {
        Self { source }
    }

    /// Read and decode one packet, or `None` if no complete packet is
    /// available right now.
    ///
    /// `None` covers three cases, all recoverable by polling again: the
    /// source is empty, the next byte is not a sync byte (it is consumed
    /// and dropped, one byte per call, until the stream realigns), or the
    /// packet body is still in flight. A truncated body is discarded
    /// rather than buffered; the stream stays misaligned until the next
    /// sync byte shows up, which the per-call hunt then finds.
    ///
    /// An invalid reading (SpO2 sentinel) still decodes to `Some`, with
    /// `valid` cleared. Invalid is a data state, not a missing packet.
    pub fn values(&mut self) -> Option<PulseOximeterValues> {
        let mut header = [0u8; 1];
        if self.source.read(&mut header) == 0 {
            return None;
        }
        if header[0] & SYNC == 0 {
            // Mid-packet byte; drop it and resync on a later call.
            return None;
        }

        let mut data = [0u8; 4];
        if self.source.read(&mut data) != 4 {
            return None;
        }

        let pleth = data[0];
        let finger_present = data[1] & FINGER_ABSENT == 0;
        // The high bit of the pulse rate travels in data[1].
        let pulse_rate = data[2] | (data[1] & PULSE_RATE_HIGH) << 1;
        let spo2 = data[3];

        Some(PulseOximeterValues {
            valid: spo2 != SPO2_INVALID,
            spo2,
            pulse_rate,
            pleth,
            finger_present,
        })
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn into_source(self) -> S {
        self.source
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct SliceSource<'a> {
        data: &'a [u8],
        pos: usize,
    }

    impl<'a> SliceSource<'a> {
        fn new(data: &'a [u8]) -> Self {
            Self { data, pos: 0 }
        }
    }

    impl ByteSource for SliceSource<'_> {
        fn read(&mut self, buf: &mut [u8]) -> usize {
            let n = buf.len().min(self.data.len() - self.pos);
            buf[..n].copy_from_slice(&self.data[self.pos..self.pos + n]);
            self.pos += n;
            n
        }
    }

    fn decode(bytes: &[u8]) -> Option<PulseOximeterValues> {
        PulseOximeter::new(SliceSource::new(bytes)).values()
    }

    #[test]
    fn decodes_reference_packet() {
        assert_eq!(
            decode(&[0x80, 0x32, 0x00, 0x46, 0x62]),
            Some(PulseOximeterValues {
                valid: true,
                spo2: 98,
                pulse_rate: 70,
                pleth: 50,
                finger_present: true,
            })
        );
    }

    #[test]
    fn empty_source_yields_nothing() {
        let mut oximeter = PulseOximeter::new(SliceSource::new(&[]));
        assert_eq!(oximeter.values(), None);
        // Polling again with still no data is a no-op, not an error.
        assert_eq!(oximeter.values(), None);
    }

    #[test]
    fn unsynchronized_byte_consumed_one_at_a_time() {
        let bytes = [0x46, 0x62, 0x80, 0x32, 0x00, 0x46, 0x62];
        let mut oximeter = PulseOximeter::new(SliceSource::new(&bytes));

        // Two mid-packet bytes dropped, one per call.
        assert_eq!(oximeter.values(), None);
        assert_eq!(oximeter.source().pos, 1);
        assert_eq!(oximeter.values(), None);
        assert_eq!(oximeter.source().pos, 2);

        // Third call lands on the sync byte.
        let values = oximeter.values().unwrap();
        assert_eq!(values.spo2, 98);
        assert_eq!(values.pulse_rate, 70);
    }

    #[test]
    fn truncated_body_is_discarded() {
        assert_eq!(decode(&[0x80]), None);
        assert_eq!(decode(&[0x80, 0x32, 0x00]), None);
    }

    #[test]
    fn pulse_rate_high_bit_reassembled() {
        // Bit 6 of data[1] is bit 7 of the rate.
        let values = decode(&[0x80, 0x00, 0x40, 0x00, 0x62]).unwrap();
        assert_eq!(values.pulse_rate, 128);

        let values = decode(&[0x80, 0x00, 0x40, 0x46, 0x62]).unwrap();
        assert_eq!(values.pulse_rate, 198);

        // Without the high bit the low byte passes through untouched.
        let values = decode(&[0x80, 0x00, 0x00, 0xFF, 0x62]).unwrap();
        assert_eq!(values.pulse_rate, 255);
    }

    #[test]
    fn spo2_sentinel_clears_valid() {
        let values = decode(&[0x80, 0x32, 0x00, 0x46, 127]).unwrap();
        assert!(!values.valid);
        assert_eq!(values.spo2, 127);

        assert!(decode(&[0x80, 0x32, 0x00, 0x46, 126]).unwrap().valid);
        assert!(decode(&[0x80, 0x32, 0x00, 0x46, 0]).unwrap().valid);
    }

    #[test]
    fn finger_absent_flag_inverted() {
        assert!(!decode(&[0x80, 0x32, 0x10, 0x46, 0x62]).unwrap().finger_present);
        assert!(decode(&[0x80, 0x32, 0x00, 0x46, 0x62]).unwrap().finger_present);
    }

    #[test]
    fn status_bits_are_ignored() {
        // Beep/probe/signal header bits and the bar-graph nibble do not
        // change the decoded fields.
        let plain = decode(&[0x80, 0x32, 0x00, 0x46, 0x62]).unwrap();
        let noisy = decode(&[0xFF, 0x32, 0x0F, 0x46, 0x62]).unwrap();
        assert_eq!(plain, noisy);
    }

    #[test]
    fn field_extraction_over_arbitrary_payloads() {
        for &(b1, b2) in &[(0x00u8, 0x00u8), (0x50, 0x13), (0x40, 0x80), (0x10, 0xFF)] {
            let values = decode(&[0x81, 0xAB, b1, b2, 0x55]).unwrap();
            assert_eq!(values.pleth, 0xAB);
            assert_eq!(values.finger_present, b1 & 0x10 == 0);
            assert_eq!(values.pulse_rate, b2 | (b1 & 0x40) << 1);
            assert_eq!(values.spo2, 0x55);
        }
    }
}
