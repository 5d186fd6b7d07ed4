//! XOR checksum used by the SHMP frame trailer (spec §3: `CHK`).

/// Computes `0xFF XOR` folded over every byte, i.e. the SHMP frame checksum
/// when given `LEN..=last DATA byte`.
pub fn xor_sum(data: &[u8]) -> u8 {
    data.iter().fold(0xff, |acc, x| acc ^ x)
}

#[test]
fn test_xor_sum() {
    // LEN=03 TYPE=00 CMD=02 -> checksum 0xfe (matches spec §8 scenario 1 framing)
    let input = hex::decode("030002").unwrap();
    assert_eq!(xor_sum(&input), 0xfe);
}
