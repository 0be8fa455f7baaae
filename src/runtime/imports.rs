use std::{
    fs,
    path::{Path, PathBuf},
    thread::{self, ThreadId},
};

use indexmap::IndexMap;
use parking_lot::{Mutex, RwLock};
use tracing::debug;

use crate::{
    ast::Expr,
    diagnostics::SourceSpan,
    environment::{Environment, EnvironmentRef},
    parser,
    value::Value,
};

use super::{error_at, Evaluator};

const SOURCE_EXTENSION: &str = "vint";

/// Finds `<name>.vint` files for `import` and tracks which files are being
/// loaded so cycles can be refused.
pub struct ModuleResolver {
    search_paths: RwLock<Vec<PathBuf>>,
    loading: Mutex<Vec<(ThreadId, PathBuf)>>,
}

impl ModuleResolver {
    pub fn new(search_paths: Vec<PathBuf>) -> Self {
        Self {
            search_paths: RwLock::new(search_paths),
            loading: Mutex::new(Vec::new()),
        }
    }

    /// Makes `path` the first directory searched.
    pub fn prepend_search_path(&self, path: impl Into<PathBuf>) {
        let path = path.into();
        let mut paths = self.search_paths.write();
        paths.retain(|existing| existing != &path);
        paths.insert(0, path);
    }

    pub fn search_paths(&self) -> Vec<PathBuf> {
        self.search_paths.read().clone()
    }

    /// Configured paths first, then the working directory and `./modules`.
    pub fn find(&self, name: &str) -> Option<PathBuf> {
        let file = format!("{name}.{SOURCE_EXTENSION}");
        self.candidates()
            .into_iter()
            .map(|dir| dir.join(&file))
            .find(|candidate| candidate.is_file())
    }

    /// Include paths are used as given when they exist, otherwise looked up
    /// relative to each search directory.
    pub fn resolve_include(&self, raw: &str) -> PathBuf {
        let direct = PathBuf::from(raw);
        if direct.is_absolute() || direct.is_file() {
            return direct;
        }
        self.candidates()
            .into_iter()
            .map(|dir| dir.join(raw))
            .find(|candidate| candidate.is_file())
            .unwrap_or(direct)
    }

    fn candidates(&self) -> Vec<PathBuf> {
        let mut dirs = self.search_paths();
        dirs.push(PathBuf::from("."));
        dirs.push(PathBuf::from("modules"));
        dirs
    }

    /// Marks `path` as loading on this thread; false when it already is.
    fn begin(&self, path: &Path) -> bool {
        let me = thread::current().id();
        let mut loading = self.loading.lock();
        if loading.iter().any(|(owner, file)| *owner == me && file == path) {
            return false;
        }
        loading.push((me, path.to_path_buf()));
        true
    }

    fn finish(&self, path: &Path) {
        let me = thread::current().id();
        let mut loading = self.loading.lock();
        if let Some(idx) = loading
            .iter()
            .rposition(|(owner, file)| *owner == me && file == path)
        {
            loading.remove(idx);
        }
    }
}

impl Evaluator {
    /// `import a, b`: built-in modules first, then `<name>.vint` files.
    pub(super) fn import_modules(
        &self,
        names: &[String],
        env: &EnvironmentRef,
        span: SourceSpan,
    ) -> Value {
        for name in names {
            let module = match self.shared.modules.get(name.as_str()) {
                Some(module) => {
                    debug!(module = %name, "importing builtin module");
                    module.clone()
                }
                None => propagate!(self.import_file(name, span)),
            };
            let bound = env.write().set_scoped(name.clone(), module);
            if let Err(err) = bound {
                return error_at(span, err);
            }
        }
        Value::null()
    }

    /// Runs the file in a fresh environment. The import binds the file's own
    /// `name` binding when it has one, else a module of its public names.
    fn import_file(&self, name: &str, span: SourceSpan) -> Value {
        let resolver = &self.shared.resolver;
        let Some(path) = resolver.find(name) else {
            let searched: Vec<String> = resolver
                .candidates()
                .iter()
                .map(|dir| dir.display().to_string())
                .collect();
            return error_at(
                span,
                format!(
                    "Module '{name}' not found. Searched paths: {}",
                    searched.join(", ")
                ),
            );
        };
        debug!(module = %name, path = %path.display(), "importing module file");
        let scope = Environment::new();
        propagate!(self.eval_file(&path, &scope, span));

        let guard = scope.read();
        if let Some(exported) = guard.local(name) {
            return exported;
        }
        let members: IndexMap<String, Value> = guard
            .names()
            .into_iter()
            .filter(|binding| !binding.starts_with('_'))
            .filter_map(|binding| guard.local(&binding).map(|value| (binding, value)))
            .collect();
        Value::module(name, members)
    }

    /// `include "file"`: evaluates the file straight into `env`.
    pub(super) fn include_file(&self, path: &Expr, env: &EnvironmentRef, span: SourceSpan) -> Value {
        let target = propagate!(self.eval_expr(path, env));
        let Some(raw) = target.as_str() else {
            return error_at(
                span,
                format!("include expects a file path string, got {}", target.type_name()),
            );
        };
        let path = self.shared.resolver.resolve_include(raw);
        debug!(path = %path.display(), "including file");
        propagate!(self.eval_file(&path, env, span));
        Value::null()
    }

    fn eval_file(&self, path: &Path, env: &EnvironmentRef, span: SourceSpan) -> Value {
        let key = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
        if !self.shared.resolver.begin(&key) {
            return error_at(span, format!("cyclic import of '{}'", path.display()));
        }
        let result = self.eval_file_body(path, env, span);
        self.shared.resolver.finish(&key);
        result
    }

    fn eval_file_body(&self, path: &Path, env: &EnvironmentRef, span: SourceSpan) -> Value {
        let source = match fs::read_to_string(path) {
            Ok(source) => source,
            Err(err) => {
                return error_at(
                    span,
                    format!("Failed to open file '{}': {err}", path.display()),
                )
            }
        };
        let program = match parser::parse_program(&source) {
            Ok(program) => program,
            Err(diagnostic) => {
                return error_at(
                    span,
                    format!("Syntax errors in file '{}':\n{diagnostic}", path.display()),
                )
            }
        };
        let result = self.eval(&program, env);
        match result.error_message() {
            Some(message) => error_at(
                span,
                format!("Runtime error in file '{}': {message}", path.display()),
            ),
            None => result,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prepended_paths_are_searched_first() {
        let resolver = ModuleResolver::new(vec![PathBuf::from("lib")]);
        resolver.prepend_search_path("scripts");
        resolver.prepend_search_path("lib");
        assert_eq!(
            resolver.search_paths(),
            vec![PathBuf::from("lib"), PathBuf::from("scripts")]
        );
    }

    #[test]
    fn nested_loads_of_the_same_file_are_refused() {
        let resolver = ModuleResolver::new(Vec::new());
        let path = Path::new("a.vint");
        assert!(resolver.begin(path));
        assert!(!resolver.begin(path));
        resolver.finish(path);
        assert!(resolver.begin(path));
    }
}
