//! Modules: units of functionality with a start/stop lifecycle and an exported symbol table.
//!
//! A [Module] is opaque until started: [Module::resolve_symbol] finds nothing in a stopped
//! module even when its table holds the name. Started modules are searched either through
//! their [ModuleParent] or through a [ModuleLedger]; [MODULES] is the kernel's.
//!
//! Resolution is a flat, first-match namespace. Two modules exporting the same name are not
//! detected; the one visited first wins.
pub mod parent;
pub mod symbol;

pub use parent::ModuleParent;
pub use symbol::ModuleSymbol;

use alloc::{boxed::Box, string::String, vec::Vec};
use core::fmt;

use log::{info, warn};
use utils::vec::LockedVec;

use crate::{
    dev::{Handle, HandleRef},
    error::{Error, Result},
    mutex::Mutex,
};

pub type ModuleHook = Box<dyn Fn() -> Result<()> + Send + Sync>;

#[derive(Default)]
struct ModuleInternal {
    constructed: bool,
    added: bool,
    started: bool,
    /// A start or stop hook is running.
    busy: bool,
    parent: Option<HandleRef<ModuleParent>>,
}

pub struct Module {
    name: String,
    start: Option<ModuleHook>,
    stop: Option<ModuleHook>,
    symbols: Vec<ModuleSymbol>,
    internal: Mutex<ModuleInternal>,
}

impl Module {
    pub fn builder(name: &str) -> ModuleBuilder {
        ModuleBuilder {
            module: Module {
                name: String::from(name),
                start: None,
                stop: None,
                symbols: Vec::new(),
                internal: Mutex::new(ModuleInternal::default()),
            },
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn symbols(&self) -> &[ModuleSymbol] {
        &self.symbols
    }

    pub fn construct(&self) -> Result<()> {
        let mut internal = self.internal.lock();
        if internal.constructed {
            return Err(Error::InvalidState);
        }
        internal.constructed = true;
        debug_ex!("construct module {}", self.name);
        Ok(())
    }

    /// Fails with [Error::InvalidState] while the module is started or registered.
    pub fn destruct(&self) -> Result<()> {
        let mut internal = self.internal.lock();
        if !internal.constructed || internal.started || internal.added || internal.busy {
            return Err(Error::InvalidState);
        }
        internal.constructed = false;
        debug_ex!("destruct module {}", self.name);
        Ok(())
    }

    pub fn is_constructed(&self) -> bool {
        self.internal.lock().constructed
    }

    pub fn is_added(&self) -> bool {
        self.internal.lock().added
    }

    pub fn is_started(&self) -> bool {
        self.internal.lock().started
    }

    pub fn parent(&self) -> Option<Handle<ModuleParent>> {
        self.internal.lock().parent.as_ref()?.get_handle()
    }

    /// Run the start hook unless already started. A failing hook leaves the module stopped.
    pub fn start(&self) -> Result<()> {
        if !self.begin_transition(true)? {
            return Ok(());
        }
        info!("start {}", self.name);
        let result = self.start.as_ref().map_or(Ok(()), |hook| hook());
        if let Err(error) = result {
            warn!("failed to start {}: {error}", self.name);
        }
        self.end_transition(result.is_ok());
        result
    }

    /// Run the stop hook unless already stopped. A failing hook leaves the module started.
    pub fn stop(&self) -> Result<()> {
        if !self.begin_transition(false)? {
            return Ok(());
        }
        info!("stop {}", self.name);
        let result = self.stop.as_ref().map_or(Ok(()), |hook| hook());
        if let Err(error) = result {
            warn!("failed to stop {}: {error}", self.name);
        }
        self.end_transition(result.is_err());
        result
    }

    /// Mark a transition towards `started`, or return `false` when the module is already there.
    fn begin_transition(&self, started: bool) -> Result<bool> {
        let mut internal = self.internal.lock();
        if internal.busy {
            return Err(Error::InvalidState);
        }
        if internal.started == started {
            return Ok(false);
        }
        internal.busy = true;
        Ok(true)
    }

    fn end_transition(&self, started: bool) {
        let mut internal = self.internal.lock();
        internal.busy = false;
        internal.started = started;
    }

    /// The address exported as `name`. Stopped modules export nothing.
    pub fn resolve_symbol(&self, name: &str) -> Result<usize> {
        if !self.is_started() {
            return Err(Error::NotFound);
        }
        self.symbols
            .iter()
            .find(|symbol| symbol.name() == name)
            .map(ModuleSymbol::address)
            .ok_or(Error::NotFound)
    }

    fn claim_added(&self, added: bool) -> Result<()> {
        let mut internal = self.internal.lock();
        if !internal.constructed || internal.added == added {
            return Err(Error::InvalidState);
        }
        internal.added = added;
        Ok(())
    }
}

impl Handle<Module> {
    /// Move the module under `parent`, or detach it with [None].
    ///
    /// Refused with [Error::InvalidState] while started. Naming the current parent again
    /// does nothing.
    pub fn set_parent(&self, parent: Option<&Handle<ModuleParent>>) -> Result<()> {
        let mut internal = self.internal.lock();
        if internal.started || internal.busy {
            return Err(Error::InvalidState);
        }
        let same = match (&internal.parent, parent) {
            (Some(current), Some(parent)) => current.refers_to(parent),
            (None, None) => true,
            _ => false,
        };
        if same {
            return Ok(());
        }
        if let Some(parent) = parent {
            parent.attach(self)?;
        }
        if let Some(previous) = internal.parent.take().and_then(|previous| previous.get_handle()) {
            previous.detach(self);
        }
        internal.parent = parent.map(Handle::create_ref);
        Ok(())
    }
}

impl fmt::Debug for Module {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Module")
            .field("name", &self.name)
            .field("symbols", &self.symbols.len())
            .finish()
    }
}

pub struct ModuleBuilder {
    module: Module,
}

impl ModuleBuilder {
    pub fn start<F>(mut self, hook: F) -> Self
    where
        F: Fn() -> Result<()> + Send + Sync + 'static,
    {
        self.module.start = Some(Box::new(hook));
        self
    }

    pub fn stop<F>(mut self, hook: F) -> Self
    where
        F: Fn() -> Result<()> + Send + Sync + 'static,
    {
        self.module.stop = Some(Box::new(hook));
        self
    }

    pub fn symbols(mut self, symbols: Vec<ModuleSymbol>) -> Self {
        self.module.symbols = symbols;
        self
    }

    pub fn build(self) -> Handle<Module> {
        Handle::new(self.module)
    }
}

// region: ledger

pub struct ModuleLedger {
    modules: LockedVec<Handle<Module>>,
}

/// Modules registered with the kernel.
pub static MODULES: ModuleLedger = ModuleLedger::new();

impl ModuleLedger {
    pub const fn new() -> ModuleLedger {
        ModuleLedger {
            modules: LockedVec::new(),
        }
    }

    /// Register a constructed module. Registration is independent of its start state.
    pub fn add(&self, module: &Handle<Module>) -> Result<()> {
        module.claim_added(true)?;
        self.modules.push(module.clone());
        Ok(())
    }

    pub fn remove(&self, module: &Handle<Module>) -> Result<()> {
        if self.modules.remove_first(|added| added.ptr_eq(module)).is_none() {
            return Err(Error::NotFound);
        }
        let _ = module.claim_added(false);
        Ok(())
    }

    /// Construct, register and start `module`, undoing all of it if the start fails.
    pub fn construct_add_start(&self, module: &Handle<Module>) -> Result<()> {
        module.construct()?;
        if let Err(error) = self.add(module) {
            let _ = module.destruct();
            return Err(error);
        }
        if let Err(error) = module.start() {
            let _ = self.remove(module);
            let _ = module.destruct();
            return Err(error);
        }
        Ok(())
    }

    /// Ask every registered module in order; the first started one exporting `name` wins.
    pub fn resolve_symbol(&self, name: &str) -> Result<usize> {
        self.modules
            .snapshot()
            .iter()
            .find_map(|module| module.resolve_symbol(name).ok())
            .ok_or(Error::NotFound)
    }

    pub fn find_by_name(&self, name: &str) -> Option<Handle<Module>> {
        self.modules.find(|module| module.name == name)
    }

    pub fn contains(&self, module: &Handle<Module>) -> bool {
        self.modules.any(|added| added.ptr_eq(module))
    }

    /// Visit modules in registration order until `visitor` returns `false`.
    pub fn for_each(&self, visitor: impl FnMut(&Handle<Module>) -> bool) {
        self.modules.for_each(visitor);
    }

    pub fn len(&self) -> usize {
        self.modules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }
}

impl Default for ModuleLedger {
    fn default() -> Self {
        Self::new()
    }
}

/// Resolve `name` across every module in [MODULES].
pub fn resolve_symbol_global(name: &str) -> Result<usize> {
    MODULES.resolve_symbol(name)
}

// endregion

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::sync::Arc;
    use core::sync::atomic::{AtomicUsize, Ordering};

    fn exported() -> i32 {
        7
    }

    fn counting(starts: &Arc<AtomicUsize>, stops: &Arc<AtomicUsize>) -> Handle<Module> {
        let starts = starts.clone();
        let stops = stops.clone();
        Module::builder("counting")
            .start(move || {
                starts.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .stop(move || {
                stops.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .build()
    }

    #[test]
    fn start_and_stop_are_idempotent() {
        let starts = Arc::new(AtomicUsize::new(0));
        let stops = Arc::new(AtomicUsize::new(0));
        let module = counting(&starts, &stops);
        module.start().unwrap();
        module.start().unwrap();
        assert_eq!(starts.load(Ordering::SeqCst), 1);
        assert!(module.is_started());
        module.stop().unwrap();
        module.stop().unwrap();
        assert_eq!(stops.load(Ordering::SeqCst), 1);
        assert!(!module.is_started());
    }

    #[test]
    fn hook_errors_propagate_unchanged() {
        let module = Module::builder("broken").start(|| Err(Error::NotFound)).build();
        assert_eq!(module.start(), Err(Error::NotFound));
        assert!(!module.is_started());

        let stuck = Module::builder("stuck").stop(|| Err(Error::NotSupported)).build();
        stuck.start().unwrap();
        assert_eq!(stuck.stop(), Err(Error::NotSupported));
        assert!(stuck.is_started());
    }

    #[test]
    fn symbols_are_visible_only_while_started() {
        let module = Module::builder("exporter")
            .symbols(crate::define_module_symbols![exported => exported])
            .build();
        assert_eq!(module.resolve_symbol("exported"), Err(Error::NotFound));
        module.start().unwrap();
        let address = module.resolve_symbol("exported").unwrap();
        let function: fn() -> i32 = unsafe { core::mem::transmute(address) };
        assert_eq!(function(), 7);
        assert_eq!(module.resolve_symbol("missing"), Err(Error::NotFound));
        module.stop().unwrap();
        assert_eq!(module.resolve_symbol("exported"), Err(Error::NotFound));
    }

    #[test]
    fn parent_cannot_change_while_started() {
        let parent = ModuleParent::new("parent");
        parent.construct().unwrap();
        let module = Module::builder("pinned").build();
        module.set_parent(Some(&parent)).unwrap();
        module.start().unwrap();
        assert_eq!(module.set_parent(None), Err(Error::InvalidState));
        module.stop().unwrap();
        module.set_parent(None).unwrap();
    }

    #[test]
    fn ledger_lifecycle() {
        let ledger = ModuleLedger::new();
        let module = Module::builder("ledgered")
            .symbols(crate::define_module_symbols![exported => exported])
            .build();
        assert_eq!(ledger.add(&module), Err(Error::InvalidState));
        ledger.construct_add_start(&module).unwrap();
        assert!(ledger.contains(&module));
        assert!(ledger.resolve_symbol("exported").is_ok());
        assert_eq!(module.destruct(), Err(Error::InvalidState));
        module.stop().unwrap();
        assert_eq!(ledger.resolve_symbol("exported"), Err(Error::NotFound));
        ledger.remove(&module).unwrap();
        assert_eq!(ledger.remove(&module), Err(Error::NotFound));
        module.destruct().unwrap();
    }

    #[test]
    fn failed_construct_add_start_leaves_nothing_behind() {
        let ledger = ModuleLedger::new();
        let module = Module::builder("doomed").start(|| Err(Error::Resource)).build();
        assert_eq!(ledger.construct_add_start(&module), Err(Error::Resource));
        assert!(ledger.is_empty());
        assert!(!module.is_constructed());
    }
}
