//! Exported symbol tables.

/// A named address exported by a module.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModuleSymbol {
    name: &'static str,
    address: usize,
}

impl ModuleSymbol {
    pub const fn new(name: &'static str, address: usize) -> ModuleSymbol {
        ModuleSymbol { name, address }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn address(&self) -> usize {
        self.address
    }
}

/// Build a symbol table from function items:
///
/// ```ignore
/// let symbols = define_module_symbols![
///     device_start => tactile::dev::Handle::<Device>::start,
///     find_by_name => tactile::dev::find_by_name,
/// ];
/// ```
///
/// The address is the function's entry point. Callers resolving it must transmute it back
/// to the exact signature it was exported with.
#[macro_export]
macro_rules! define_module_symbols {
    ($($name:ident => $item:path),* $(,)?) => {
        ::std::vec![$($crate::module::ModuleSymbol::new(
            ::core::stringify!($name),
            $item as *const () as usize,
        )),*]
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    fn answer() -> i32 {
        42
    }

    fn twice(value: i32) -> i32 {
        value * 2
    }

    #[test]
    fn addresses_call_back_into_the_function() {
        let symbols: Vec<ModuleSymbol> = define_module_symbols![answer => answer, twice => twice];
        assert_eq!(symbols.len(), 2);
        assert_eq!(symbols[0].name(), "answer");
        let answer: fn() -> i32 = unsafe { core::mem::transmute(symbols[0].address()) };
        let twice: fn(i32) -> i32 = unsafe { core::mem::transmute(symbols[1].address()) };
        assert_eq!(answer(), 42);
        assert_eq!(twice(4), 8);
    }
}
