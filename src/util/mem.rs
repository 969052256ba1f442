use std::fmt;

pub const WORD_SIZE: usize = std::mem::size_of::<usize>();

/// A byte address inside the collector's arena. `0` is never a heap address.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Address(pub usize);

impl Address {
    #[inline(always)]
    pub const fn null() -> Address {
        Address(0)
    }

    #[inline(always)]
    pub const fn from(value: usize) -> Address {
        Address(value)
    }

    #[inline(always)]
    pub fn is_null(self) -> bool {
        self.0 == 0
    }

    #[inline(always)]
    pub fn is_non_null(self) -> bool {
        self.0 != 0
    }

    #[inline(always)]
    pub fn to_usize(self) -> usize {
        self.0
    }

    #[inline(always)]
    pub fn offset(self, bytes: usize) -> Address {
        Address(self.0 + bytes)
    }

    #[inline(always)]
    pub fn sub(self, bytes: usize) -> Address {
        Address(self.0 - bytes)
    }

    #[inline(always)]
    pub fn offset_from(self, base: Address) -> usize {
        debug_assert!(self >= base);
        self.0 - base.0
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "0x{:x}", self.0)
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "0x{:x}", self.0)
    }
}

/// Half-open address range `[start, end)`.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct Region {
    pub start: Address,
    pub end: Address,
}

impl Region {
    pub fn new(start: Address, end: Address) -> Region {
        debug_assert!(start <= end);
        Region { start, end }
    }

    #[inline(always)]
    pub fn size(&self) -> usize {
        self.end.offset_from(self.start)
    }

    #[inline(always)]
    pub fn contains(&self, addr: Address) -> bool {
        self.start <= addr && addr < self.end
    }

    #[inline(always)]
    pub fn contains_span(&self, addr: Address, size: usize) -> bool {
        self.start <= addr && addr.0 + size <= self.end.0
    }
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}-{}", self.start, self.end)
    }
}

cfg_if::cfg_if! {
    if #[cfg(unix)] {
        pub fn page_size() -> usize {
            let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
            if size <= 0 {
                4096
            } else {
                size as usize
            }
        }
    } else {
        pub fn page_size() -> usize {
            4096
        }
    }
}

#[inline(always)]
pub fn align_to(size: usize, align: usize) -> usize {
    debug_assert!(align.is_power_of_two());
    (size + align - 1) & !(align - 1)
}

pub fn align_to_page(size: usize) -> usize {
    align_to(size, page_size())
}

#[inline(always)]
pub fn align_to_word(size: usize) -> usize {
    align_to(size, WORD_SIZE)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_alignment() {
        let page = page_size();
        assert!(page.is_power_of_two());
        assert_eq!(align_to_page(1), page);
        assert_eq!(align_to_page(page), page);
        assert_eq!(align_to_page(page + 1), 2 * page);
    }

    #[test]
    fn region_bounds() {
        let region = Region::new(Address(0x100), Address(0x200));
        assert_eq!(region.size(), 0x100);
        assert!(region.contains(Address(0x100)));
        assert!(!region.contains(Address(0x200)));
        assert!(region.contains_span(Address(0x1f0), 0x10));
        assert!(!region.contains_span(Address(0x1f0), 0x11));
    }
}
