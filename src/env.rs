//! The rendering environment: the document, the definitions that programs
//! refer to by name, configuration and the transaction queue.

use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

use tracing::debug;

use crate::dom::{NodeId, SharedDocument};
use crate::fmt::{FormatFn, Formatter};
use crate::program::Handle;
use crate::render::Tree;
use crate::tag::{Runtime, Tag};
use crate::update::Updates;
use crate::{Error, Func, Reference, Result, Value};

/// A teardown callback, run when the block that registered it is cleared.
pub type Destroyable = Box<dyn FnOnce()>;

/// The arguments passed to [`Manager::create`].
#[derive(Debug, Clone)]
pub struct Args {
    /// The element a modifier is attached to. `None` for components.
    pub element: Option<NodeId>,
    pub positional: Vec<Reference>,
}

/// The capability interface of modifiers and components.
///
/// The runtime decides *when* each hook runs, the manager decides what it
/// means. `install` and `update` are queued and run on commit.
pub trait Manager {
    /// Creates the state of one instance.
    fn create(&self, owner: &Rc<dyn Any>, args: &Args) -> Result<Rc<dyn Any>>;

    /// The tag whose changes should trigger [`update`][Manager::update].
    fn get_tag(&self, _state: &Rc<dyn Any>) -> Tag {
        Tag::CONSTANT
    }

    fn install(&self, _state: &Rc<dyn Any>) -> Result<()> {
        Ok(())
    }

    fn update(&self, _state: &Rc<dyn Any>) -> Result<()> {
        Ok(())
    }

    /// Returns a callback to run when the instance is torn down.
    fn get_destroyable(&self, _state: &Rc<dyn Any>) -> Option<Destroyable> {
        None
    }

    /// The `this` of a component layout.
    fn get_self(&self, _state: &Rc<dyn Any>) -> Value {
        Value::None
    }
}

#[derive(Clone)]
pub(crate) struct ComponentDefinition {
    pub manager: Rc<dyn Manager>,
    pub layout: Handle,
}

#[derive(Clone, Default)]
pub(crate) struct Definitions {
    helpers: BTreeMap<String, Func>,
    modifiers: BTreeMap<String, Rc<dyn Manager>>,
    components: BTreeMap<String, ComponentDefinition>,
}

impl Definitions {
    pub fn helper(&self, name: &str) -> Result<&Func> {
        self.helpers
            .get(name)
            .ok_or_else(|| Error::program(format!("unknown helper `{name}`")))
    }

    pub fn modifier(&self, name: &str) -> Result<&Rc<dyn Manager>> {
        self.modifiers
            .get(name)
            .ok_or_else(|| Error::program(format!("unknown modifier `{name}`")))
    }

    pub fn component(&self, name: &str) -> Result<&ComponentDefinition> {
        self.components
            .get(name)
            .ok_or_else(|| Error::program(format!("unknown component `{name}`")))
    }
}

/// A manager hook queued until commit.
pub(crate) enum Scheduled {
    Install(Rc<dyn Manager>, Rc<dyn Any>),
    Update(Rc<dyn Manager>, Rc<dyn Any>),
}

/// The environment a program renders in.
///
/// An environment owns the document, the block tree and the updating
/// opcodes of one render root. It is moved into
/// [`render_main`][crate::render_main] and handed back through
/// [`RenderResult::env`][crate::RenderResult::env].
pub struct Env {
    pub(crate) rt: Runtime,
    pub(crate) document: SharedDocument,
    pub(crate) tree: Tree,
    pub(crate) updates: Updates,
    pub(crate) definitions: Definitions,
    pub(crate) formatter: Rc<FormatFn>,
    pub(crate) owner: Rc<dyn Any>,
    pub(crate) max_frame_depth: usize,
    pub(crate) debug_checks: bool,
    transaction: Option<Vec<Scheduled>>,
}

/// A builder for the environment configuration.
///
/// This struct is typically created using [`Env::builder()`].
#[derive(Clone)]
pub struct EnvBuilder {
    document: SharedDocument,
    rt: Option<Runtime>,
    formatter: Option<Rc<FormatFn>>,
    owner: Option<Rc<dyn Any>>,
    max_frame_depth: usize,
    debug_checks: bool,
}

impl Env {
    /// Constructs an environment with the default configuration.
    pub fn new(document: SharedDocument) -> Self {
        Self::builder(document).build()
    }

    /// Creates a new environment builder.
    ///
    /// # Examples
    ///
    /// ```
    /// use std::cell::RefCell;
    /// use std::rc::Rc;
    /// use tessera::dom::SimpleDocument;
    /// use tessera::Env;
    ///
    /// let doc = Rc::new(RefCell::new(SimpleDocument::new()));
    /// let env = Env::builder(doc).max_frame_depth(64).debug_checks(true).build();
    /// ```
    pub fn builder(document: SharedDocument) -> EnvBuilder {
        EnvBuilder::new(document)
    }

    /// The runtime that owns the revision clock and the tags of this
    /// environment. Cells exposed to templates must be created with it.
    pub fn runtime(&self) -> &Runtime {
        &self.rt
    }

    pub fn document(&self) -> &SharedDocument {
        &self.document
    }

    /// Registers a helper function.
    pub fn add_helper<F>(&mut self, name: &str, f: F)
    where
        F: Fn(&[Value]) -> Result<Value> + 'static,
    {
        self.definitions
            .helpers
            .insert(name.to_owned(), Func::new(name, f));
    }

    /// Registers a modifier.
    pub fn add_modifier<M>(&mut self, name: &str, manager: M)
    where
        M: Manager + 'static,
    {
        self.definitions
            .modifiers
            .insert(name.to_owned(), Rc::new(manager));
    }

    /// Registers a component with the handle of its layout.
    pub fn add_component<M>(&mut self, name: &str, manager: M, layout: Handle)
    where
        M: Manager + 'static,
    {
        let manager = Rc::new(manager);
        self.definitions
            .components
            .insert(name.to_owned(), ComponentDefinition { manager, layout });
    }

    /// Opens a transaction.
    ///
    /// # Panics
    ///
    /// In debug builds, if a transaction is already open. Release builds
    /// return a [`Transaction`][crate::ErrorKind::Transaction] error.
    pub fn begin(&mut self) -> Result<()> {
        if self.transaction.is_some() {
            debug_assert!(false, "transaction is already open");
            return Err(Error::transaction("transaction is already open"));
        }
        self.transaction = Some(Vec::new());
        Ok(())
    }

    /// Runs the queued `install` and `update` hooks in order and closes the
    /// transaction.
    pub fn commit(&mut self) -> Result<()> {
        let queue = self
            .transaction
            .take()
            .ok_or_else(|| Error::transaction("no transaction is open"))?;
        debug!(hooks = queue.len(), "committing transaction");
        for scheduled in queue {
            match scheduled {
                Scheduled::Install(manager, state) => manager.install(&state)?,
                Scheduled::Update(manager, state) => manager.update(&state)?,
            }
        }
        Ok(())
    }

    pub fn in_transaction(&self) -> bool {
        self.transaction.is_some()
    }

    /// Drops the queue of a failed pass.
    pub(crate) fn abort(&mut self) {
        self.transaction = None;
    }

    pub(crate) fn schedule(&mut self, scheduled: Scheduled) {
        match &mut self.transaction {
            Some(queue) => queue.push(scheduled),
            None => debug_assert!(false, "manager hook scheduled outside of a transaction"),
        }
    }
}

impl fmt::Debug for Env {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Env")
            .field("rt", &self.rt)
            .field("tree", &self.tree)
            .field("updates", &self.updates)
            .field("helpers", &self.definitions.helpers.keys())
            .field("modifiers", &self.definitions.modifiers.keys())
            .field("components", &self.definitions.components.keys())
            .field("max_frame_depth", &self.max_frame_depth)
            .field("debug_checks", &self.debug_checks)
            .field("in_transaction", &self.in_transaction())
            .finish_non_exhaustive()
    }
}

impl EnvBuilder {
    /// Creates a new environment builder.
    pub fn new(document: SharedDocument) -> Self {
        Self {
            document,
            rt: None,
            formatter: None,
            owner: None,
            max_frame_depth: 256,
            debug_checks: cfg!(debug_assertions),
        }
    }

    /// Use an existing runtime, so that cells created before the
    /// environment can be bound.
    pub fn runtime(&mut self, rt: &Runtime) -> &mut Self {
        self.rt = Some(rt.clone());
        self
    }

    /// Set the maximum number of nested call frames.
    ///
    /// Exceeding it is a program error. Defaults to 256.
    pub fn max_frame_depth(&mut self, depth: usize) -> &mut Self {
        self.max_frame_depth = depth;
        self
    }

    /// Verify block bounds against the document whenever a block is closed.
    ///
    /// Defaults to on in debug builds.
    pub fn debug_checks(&mut self, enabled: bool) -> &mut Self {
        self.debug_checks = enabled;
        self
    }

    /// Set the formatter for dynamic text and attributes.
    ///
    /// Defaults to [`fmt::default`][crate::fmt::default].
    pub fn default_formatter<F>(&mut self, f: F) -> &mut Self
    where
        F: Fn(&mut Formatter<'_>, &Value) -> crate::fmt::Result + 'static,
    {
        self.formatter = Some(Rc::new(f));
        self
    }

    /// Set the owner passed to [`Manager::create`].
    pub fn owner(&mut self, owner: Rc<dyn Any>) -> &mut Self {
        self.owner = Some(owner);
        self
    }

    pub fn build(&self) -> Env {
        let formatter: Rc<FormatFn> = match &self.formatter {
            Some(f) => f.clone(),
            None => Rc::new(crate::fmt::default),
        };
        let owner: Rc<dyn Any> = match &self.owner {
            Some(owner) => owner.clone(),
            None => Rc::new(()),
        };
        let rt = self.rt.clone().unwrap_or_default();
        Env {
            updates: Updates::new(&rt),
            rt,
            document: self.document.clone(),
            tree: Tree::new(),
            definitions: Definitions::default(),
            formatter,
            owner,
            max_frame_depth: self.max_frame_depth,
            debug_checks: self.debug_checks,
            transaction: None,
        }
    }
}

impl fmt::Debug for EnvBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EnvBuilder")
            .field("max_frame_depth", &self.max_frame_depth)
            .field("debug_checks", &self.debug_checks)
            .finish_non_exhaustive()
    }
}
