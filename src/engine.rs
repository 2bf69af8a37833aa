//! The view engine: template loading, resource imports, and the compiled
//! factory cache.
//!
//! Loading is synchronous. A `Loader` resolves template markup and resource
//! modules by id; the engine compiles markup through the shared root
//! resources and memoizes factories by url plus content hash, so editing a
//! template on disk invalidates its cached factory without any explicit
//! eviction call.

use crate::behavior::{BehaviorDescriptor, BehaviorKind};
use crate::compiler::{CompileOptions, ViewCompiler};
use crate::error::{Result, TemplatingError};
use crate::factory::ViewFactory;
use crate::registry::{ValueConverter, ViewResources};
use sha2::{Digest, Sha256};
use std::cell::RefCell;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use tracing::{debug, info};
use walkdir::WalkDir;

pub fn compute_hash(source: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(source.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// One importable unit of resources: behaviors and value converters
/// registered together under a module id.
#[derive(Clone)]
pub struct ResourceModule {
    pub id: String,
    pub behaviors: Vec<Rc<BehaviorDescriptor>>,
    pub converters: Vec<(String, Rc<dyn ValueConverter>)>,
}

impl ResourceModule {
    pub fn new(id: &str) -> Self {
        ResourceModule {
            id: id.to_string(),
            behaviors: Vec::new(),
            converters: Vec::new(),
        }
    }

    pub fn with_behavior(mut self, descriptor: Rc<BehaviorDescriptor>) -> Self {
        self.behaviors.push(descriptor);
        self
    }

    pub fn with_converter(mut self, name: &str, converter: Rc<dyn ValueConverter>) -> Self {
        self.converters.push((name.to_string(), converter));
        self
    }
}

/// Resolves template markup and resource modules by id.
pub trait Loader {
    fn load_template(&self, id: &str) -> Result<String>;

    fn load_module(&self, id: &str) -> Result<ResourceModule>;

    fn load_all_modules(&self, ids: &[String]) -> Result<Vec<ResourceModule>> {
        ids.iter().map(|id| self.load_module(id)).collect()
    }
}

/// Loader backed by registered strings; the test and embedding default.
#[derive(Default)]
pub struct InMemoryLoader {
    templates: RefCell<HashMap<String, String>>,
    modules: RefCell<HashMap<String, ResourceModule>>,
}

impl InMemoryLoader {
    pub fn new() -> Self {
        InMemoryLoader::default()
    }

    pub fn register_template(&self, id: &str, markup: &str) {
        self.templates
            .borrow_mut()
            .insert(id.to_string(), markup.to_string());
    }

    pub fn register_module(&self, module: ResourceModule) {
        self.modules.borrow_mut().insert(module.id.clone(), module);
    }
}

impl Loader for InMemoryLoader {
    fn load_template(&self, id: &str) -> Result<String> {
        self.templates
            .borrow()
            .get(id)
            .cloned()
            .ok_or_else(|| TemplatingError::Load {
                id: id.to_string(),
                reason: "template not registered".to_string(),
            })
    }

    fn load_module(&self, id: &str) -> Result<ResourceModule> {
        self.modules
            .borrow()
            .get(id)
            .cloned()
            .ok_or_else(|| TemplatingError::UnknownModule(id.to_string()))
    }
}

/// Loader resolving template urls relative to a root directory. Modules are
/// code, not files, so they are still registered programmatically.
pub struct DirectoryLoader {
    root: PathBuf,
    modules: RefCell<HashMap<String, ResourceModule>>,
}

impl DirectoryLoader {
    pub fn new(root: impl AsRef<Path>) -> Self {
        DirectoryLoader {
            root: root.as_ref().to_path_buf(),
            modules: RefCell::new(HashMap::new()),
        }
    }

    pub fn register_module(&self, module: ResourceModule) {
        self.modules.borrow_mut().insert(module.id.clone(), module);
    }

    /// All `.html` files under the root, as root-relative ids.
    pub fn discover_templates(&self) -> Vec<String> {
        let mut templates = Vec::new();
        for entry in WalkDir::new(&self.root)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
        {
            if entry.path().extension().and_then(|e| e.to_str()) == Some("html") {
                if let Ok(relative) = entry.path().strip_prefix(&self.root) {
                    templates.push(relative.to_string_lossy().replace('\\', "/"));
                }
            }
        }
        templates.sort();
        templates
    }
}

impl Loader for DirectoryLoader {
    fn load_template(&self, id: &str) -> Result<String> {
        let path = self.root.join(id);
        fs::read_to_string(&path).map_err(|e| TemplatingError::Load {
            id: id.to_string(),
            reason: e.to_string(),
        })
    }

    fn load_module(&self, id: &str) -> Result<ResourceModule> {
        self.modules
            .borrow()
            .get(id)
            .cloned()
            .ok_or_else(|| TemplatingError::UnknownModule(id.to_string()))
    }
}

#[derive(Default)]
struct FactoryCache {
    entries: RefCell<HashMap<String, Rc<ViewFactory>>>,
}

impl FactoryCache {
    fn get(&self, key: &str) -> Option<Rc<ViewFactory>> {
        self.entries.borrow().get(key).cloned()
    }

    fn insert(&self, key: String, factory: Rc<ViewFactory>) {
        self.entries.borrow_mut().insert(key, factory);
    }
}

pub struct ViewEngine {
    loader: Rc<dyn Loader>,
    compiler: ViewCompiler,
    resources: Rc<ViewResources>,
    cache: FactoryCache,
}

impl ViewEngine {
    pub fn new(loader: Rc<dyn Loader>) -> Self {
        ViewEngine::with_resources(loader, ViewResources::new_root())
    }

    pub fn with_resources(loader: Rc<dyn Loader>, resources: Rc<ViewResources>) -> Self {
        ViewEngine {
            loader,
            compiler: ViewCompiler::default(),
            resources,
            cache: FactoryCache::default(),
        }
    }

    pub fn resources(&self) -> &Rc<ViewResources> {
        &self.resources
    }

    /// Load, compile, and memoize the template at `url`. Stale cache entries
    /// miss on the content hash and recompile.
    pub fn load_view_factory(&self, url: &str) -> Result<Rc<ViewFactory>> {
        let markup = self.loader.load_template(url)?;
        let key = format!("{url}:{}", compute_hash(&markup));
        if let Some(factory) = self.cache.get(&key) {
            debug!(url, "view factory cache hit");
            return Ok(factory);
        }

        let factory = self
            .compiler
            .compile_str(&markup, &self.resources, &CompileOptions::default())?;
        info!(url, instructions = factory.instruction_count(), "compiled view");
        self.cache.insert(key, factory.clone());
        Ok(factory)
    }

    /// Compile inline markup, memoized by content hash alone.
    pub fn compile_inline(&self, markup: &str) -> Result<Rc<ViewFactory>> {
        let key = format!("inline:{}", compute_hash(markup));
        if let Some(factory) = self.cache.get(&key) {
            return Ok(factory);
        }
        let factory = self
            .compiler
            .compile_str(markup, &self.resources, &CompileOptions::default())?;
        self.cache.insert(key, factory.clone());
        Ok(factory)
    }

    /// Resolve modules and register everything they export into the engine's
    /// root resources.
    pub fn import_resources(&self, ids: &[String]) -> Result<()> {
        for module in self.loader.load_all_modules(ids)? {
            info!(module = %module.id, behaviors = module.behaviors.len(), "importing resources");
            for descriptor in module.behaviors {
                let name = descriptor.name.clone();
                match descriptor.kind {
                    BehaviorKind::Element => self.resources.register_element(&name, descriptor)?,
                    BehaviorKind::Attribute | BehaviorKind::TemplateController => {
                        self.resources.register_attribute(&name, descriptor)?
                    }
                }
            }
            for (name, converter) in module.converters {
                self.resources.register_value_converter(&name, converter)?;
            }
        }
        Ok(())
    }
}

/// How a composition obtains its view.
#[derive(Clone)]
pub enum ViewStrategy {
    /// Load and compile the template at this loader url.
    RelativeUrl(String),
    /// Compile this markup directly.
    InlineTemplate(String),
}

impl ViewStrategy {
    pub fn load_view_factory(&self, engine: &ViewEngine) -> Result<Rc<ViewFactory>> {
        match self {
            ViewStrategy::RelativeUrl(url) => engine.load_view_factory(url),
            ViewStrategy::InlineTemplate(markup) => engine.compile_inline(markup),
        }
    }
}
