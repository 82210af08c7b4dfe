//! Module parents: named groups of modules searched together during symbol resolution.
use alloc::{string::String, vec::Vec};

use log::debug;

use crate::{
    dev::Handle,
    error::{Error, Result},
    module::Module,
    mutex::Mutex,
};

pub struct ModuleParent {
    name: String,
    /// [None] until constructed.
    children: Mutex<Option<Vec<Handle<Module>>>>,
}

impl ModuleParent {
    pub fn new(name: &str) -> Handle<ModuleParent> {
        Handle::new(ModuleParent {
            name: String::from(name),
            children: Mutex::new(None),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn construct(&self) -> Result<()> {
        let mut children = self.children.lock();
        if children.is_some() {
            return Err(Error::InvalidState);
        }
        *children = Some(Vec::new());
        Ok(())
    }

    /// Fails with [Error::InvalidState] while modules still name this parent.
    /// Destructing an unconstructed parent does nothing.
    pub fn destruct(&self) -> Result<()> {
        let mut children = self.children.lock();
        if children.as_ref().is_some_and(|children| !children.is_empty()) {
            return Err(Error::InvalidState);
        }
        *children = None;
        Ok(())
    }

    pub fn is_constructed(&self) -> bool {
        self.children.lock().is_some()
    }

    pub fn child_count(&self) -> usize {
        self.children.lock().as_ref().map_or(0, Vec::len)
    }

    pub(crate) fn attach(&self, module: &Handle<Module>) -> Result<()> {
        let mut children = self.children.lock();
        let children = children.as_mut().ok_or(Error::InvalidState)?;
        debug!("{} adopts {}", self.name, module.name());
        children.push(module.clone());
        Ok(())
    }

    pub(crate) fn detach(&self, module: &Handle<Module>) {
        if let Some(children) = self.children.lock().as_mut() {
            children.retain(|child| !child.ptr_eq(module));
        }
    }

    /// Ask every child in order; the first started module exporting `name` wins.
    pub fn resolve_symbol(&self, name: &str) -> Result<usize> {
        let children = self.children.lock().clone().unwrap_or_default();
        children
            .iter()
            .find_map(|child| child.resolve_symbol(name).ok())
            .ok_or(Error::NotFound)
    }
}
