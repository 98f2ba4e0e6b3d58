use elf::abi::{STB_GLOBAL, STB_WEAK, STT_FUNC, STT_GNU_IFUNC, STT_NOTYPE, STT_OBJECT};
use elf::symbol::Symbol;
use serde::Serialize;

/// What a dynamic symbol refers to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SymbolKind {
    Function,
    /// `STT_GNU_IFUNC`: the address is a resolver that returns the
    /// implementation, not the implementation itself.
    IndirectFunction,
    Object,
    Untyped,
}

/// A defined dynamic symbol of an [`ElfImage`](super::ElfImage).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ElfSymbolInfo {
    pub name: String,
    /// Link-time address (`st_value`).
    pub value: u64,
    pub size: u64,
    pub kind: SymbolKind,
}

impl SymbolKind {
    pub(crate) fn of(sym: &Symbol) -> Option<SymbolKind> {
        match sym.st_symtype() {
            STT_FUNC => Some(SymbolKind::Function),
            STT_GNU_IFUNC => Some(SymbolKind::IndirectFunction),
            STT_OBJECT => Some(SymbolKind::Object),
            STT_NOTYPE => Some(SymbolKind::Untyped),
            _ => None,
        }
    }

    #[inline]
    pub fn is_code(self) -> bool {
        matches!(self, SymbolKind::Function | SymbolKind::IndirectFunction)
    }
}

/// Whether `sym` can satisfy a lookup: defined, exported and of a kind
/// that has an address worth calling or patching.
#[inline]
pub(crate) fn is_resolvable(sym: &Symbol) -> bool {
    !sym.is_undefined()
        && matches!(sym.st_bind(), STB_GLOBAL | STB_WEAK)
        && SymbolKind::of(sym).is_some()
}
