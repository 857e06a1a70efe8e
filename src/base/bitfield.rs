/// Encode/decode helper for a field of `SIZE` bits at `POSITION` inside a
/// 64-bit tag word.
pub struct BitField<const SIZE: usize, const POSITION: usize>;

impl<const SIZE: usize, const POSITION: usize> BitField<SIZE, POSITION> {
    pub const NEXT_BIT: usize = POSITION + SIZE;

    #[inline(always)]
    pub const fn mask() -> u64 {
        (1u64 << SIZE) - 1
    }

    #[inline(always)]
    pub const fn mask_in_place() -> u64 {
        Self::mask() << POSITION as u64
    }

    #[inline(always)]
    pub const fn shift() -> usize {
        POSITION
    }

    #[inline(always)]
    pub const fn is_valid(value: u64) -> bool {
        Self::decode(Self::encode(value)) == value
    }

    #[inline(always)]
    pub const fn decode(tag: u64) -> u64 {
        (tag >> POSITION as u64) & Self::mask()
    }

    #[inline(always)]
    pub const fn encode(value: u64) -> u64 {
        (value & Self::mask()) << POSITION as u64
    }

    #[inline(always)]
    pub const fn update(value: u64, original: u64) -> u64 {
        Self::encode(value) | (!Self::mask_in_place() & original)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    type Flag = BitField<1, 4>;
    type Size = BitField<32, 5>;

    #[test]
    fn encode_decode_round_trip() {
        assert_eq!(Flag::decode(Flag::encode(1)), 1);
        assert_eq!(Size::decode(Size::encode(0xdead_beef)), 0xdead_beef);
        assert!(Size::is_valid(u32::MAX as u64));
        assert!(!Size::is_valid(1u64 << 33));
    }

    #[test]
    fn update_preserves_other_fields() {
        let tag = Flag::encode(1) | Size::encode(100);
        let tag = Size::update(200, tag);
        assert_eq!(Flag::decode(tag), 1);
        assert_eq!(Size::decode(tag), 200);
    }
}
