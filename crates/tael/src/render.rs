// Copyright 2019-2026 Maravilla Labs, operated by SOLUTAS GmbH, Switzerland
// SPDX-License-Identifier: Apache-2.0
// SPDX-License-Identifier: MIT

//! The program interpreter.
//!
//! Executes a compiled [`Program`] against a scope mapping, a
//! translation callable and optional keyword arguments, producing the
//! rendered document. One renderer serves one render: the output
//! buffer, scope, repeat dictionary and switch state are all local.
//! The compiled program itself is shared read-only, so parallel
//! renders of one template are safe.
//!
//! Every expression evaluation runs inside an error-tracking frame:
//! a failure is wrapped into a [`RenderError`] carrying the literal
//! expression text, the template location and a bounded variables
//! snapshot. Runtime-kind failures pass through without the wrapping
//! extras.

use crate::config::Settings;
use crate::error::{ErrorKind, EvalError, RenderError, Result, SourceContext, TalError};
use crate::i18n::{invoke_translation, normalize_msgid, Translator};
use crate::program::{
    AttrPlan, AttrValuePlan, DefineScope, ElementPlan, ExprInfo, MacroDef, OmitPlan, Program,
    Step, TplPart, TranslatePlan,
};
use crate::pyexpr::{self, NameResolver};
use crate::runtime::{escape_attribute, escape_html, RepeatDict, RepeatState, Scope};
use crate::tales::{Expr, StrPart};
use crate::value::{get_attr_with_item_fallback, Builtin, ObjectValue, Value, ValueMap};
use std::collections::HashSet;
use std::sync::Arc;

/// Macro/slot recursion ceiling; exceeding it is a runtime error.
const MAX_MACRO_DEPTH: usize = 128;

/// Resolves `load:` expressions to compiled programs.
///
/// Implemented by the template driver; paths are relative to the
/// current template.
pub trait ProgramLoader: Send + Sync {
    /// Loads and compiles the referenced template.
    fn load(&self, path: &str) -> Result<Arc<Program>>;
}

/// A loaded template reference, as produced by `load:`.
///
/// Exposes `macros` as a mapping from macro name to macro value, and
/// resolves item access by macro name directly.
#[derive(Debug, Clone)]
pub struct TemplateRef {
    program: Arc<Program>,
}

impl TemplateRef {
    /// Wraps a compiled program.
    pub fn new(program: Arc<Program>) -> Self {
        Self { program }
    }

    fn macro_value(&self, name: &str) -> Option<Value> {
        self.program
            .macro_named(name)
            .map(|def| Value::Macro(Arc::new(def.clone())))
    }
}

impl ObjectValue for TemplateRef {
    fn attr(&self, name: &str) -> Option<Value> {
        if name == "macros" {
            let mut map = ValueMap::new();
            for def in &self.program.macros {
                map.insert_str(def.name.clone(), Value::Macro(Arc::new(def.clone())));
            }
            return Some(Value::Map(map));
        }
        self.macro_value(name)
    }

    fn item(&self, key: &Value) -> Option<Value> {
        match key {
            Value::Str(name) | Value::Markup(name) => self.macro_value(name),
            _ => None,
        }
    }

    fn repr(&self) -> String {
        match &self.program.filename {
            Some(name) => format!("<template {}>", name),
            None => "<template>".to_string(),
        }
    }

    fn type_name(&self) -> &'static str {
        "template"
    }
}

/// The `error` variable bound inside a `tal:on-error` expression.
#[derive(Debug, Clone)]
struct ErrorValue {
    kind: ErrorKind,
    message: String,
}

impl ObjectValue for ErrorValue {
    fn attr(&self, name: &str) -> Option<Value> {
        match name {
            "type" => Some(Value::Str(self.kind.to_string())),
            "message" | "args" => Some(Value::Str(self.message.clone())),
            _ => None,
        }
    }

    fn repr(&self) -> String {
        format!("{}: {}", self.kind, self.message)
    }

    fn type_name(&self) -> &'static str {
        "error"
    }
}

/// Everything a single render needs besides the program.
pub struct RenderParams<'a> {
    /// The scope mapping (main template variables).
    pub vars: &'a ValueMap,
    /// The translation callable.
    pub translator: &'a dyn Translator,
    /// Render-time keyword arguments (the argument scope layer).
    pub kwargs: &'a ValueMap,
    /// `load:` resolution hook.
    pub loader: Option<&'a dyn ProgramLoader>,
    /// Template source for rich error context (debug mode keeps it).
    pub source: Option<&'a str>,
    /// Engine settings.
    pub settings: &'a Settings,
}

/// Renders a compiled program to a string.
pub fn render_program(program: &Program, params: &RenderParams<'_>) -> Result<String> {
    let mut renderer = Renderer::new(program, params);
    renderer.exec(&program.root)?;
    Ok(renderer.out)
}

/// Renders one macro of a compiled program, with slot fills.
pub fn render_macro(
    program: &Program,
    def: &MacroDef,
    fills: Vec<(String, Step)>,
    params: &RenderParams<'_>,
) -> Result<String> {
    let mut renderer = Renderer::new(program, params);
    renderer.slot_stack.push(fills);
    renderer.exec(&def.body)?;
    Ok(renderer.out)
}

struct Renderer<'a> {
    program: &'a Program,
    settings: &'a Settings,
    translator: &'a dyn Translator,
    loader: Option<&'a dyn ProgramLoader>,
    source: Option<&'a str>,
    out: String,
    scope: Scope,
    repeat: RepeatDict,
    switch_stack: Vec<(Value, bool)>,
    slot_stack: Vec<Vec<(String, Step)>>,
    slot_mask: usize,
    mapping_stack: Vec<ValueMap>,
    macro_depth: usize,
}

struct ScopeView<'r> {
    scope: &'r Scope,
    repeat: &'r RepeatDict,
}

impl<'r> NameResolver for ScopeView<'r> {
    fn resolve_name(&self, name: &str) -> Option<Value> {
        match name {
            "repeat" => Some(Value::Object(Arc::new(self.repeat.clone()))),
            "default" => Some(Value::Default),
            "nothing" => Some(Value::None),
            "econtext" => {
                let mut map = ValueMap::new();
                for n in self.scope.names() {
                    if let Some(v) = self.scope.lookup(&n) {
                        map.insert_str(n, v);
                    }
                }
                Some(Value::Map(map))
            }
            _ => self.scope.lookup(name),
        }
    }
}

impl<'a> Renderer<'a> {
    fn new(program: &'a Program, params: &RenderParams<'a>) -> Self {
        let mut builtins: Vec<(String, Value)> = Builtin::all()
            .iter()
            .map(|b| (b.name().to_string(), Value::Builtin(*b)))
            .collect();
        for (name, value) in &params.settings.extra_builtins {
            builtins.push((name.clone(), value.clone()));
        }
        let mut scope = Scope::new(builtins);
        for (k, v) in params.vars.iter() {
            scope.define_local(k.as_string(), v.clone());
        }
        scope.set_args(
            params
                .kwargs
                .iter()
                .map(|(k, v)| (k.as_string(), v.clone()))
                .collect(),
        );
        Self {
            program,
            settings: params.settings,
            translator: params.translator,
            loader: params.loader,
            source: params.source,
            out: String::new(),
            scope,
            repeat: RepeatDict::new(),
            switch_stack: Vec::new(),
            slot_stack: Vec::new(),
            slot_mask: 0,
            mapping_stack: Vec::new(),
            macro_depth: 0,
        }
    }

    // -----------------------------------------------------------------
    // Expression evaluation

    fn eval_expr(&self, expr: &Expr) -> std::result::Result<Value, EvalError> {
        let view = ScopeView {
            scope: &self.scope,
            repeat: &self.repeat,
        };
        self.eval_expr_with(expr, &view)
    }

    fn eval_expr_with(
        &self,
        expr: &Expr,
        view: &dyn NameResolver,
    ) -> std::result::Result<Value, EvalError> {
        match expr {
            Expr::Py(py) => pyexpr::eval(py, view),
            Expr::StringTpl(parts) => {
                let mut text = String::new();
                for part in parts {
                    match part {
                        StrPart::Literal(lit) => text.push_str(lit),
                        StrPart::Sub(py) => {
                            let value = pyexpr::eval(py, view)?;
                            match value {
                                Value::None => {}
                                other => text.push_str(&other.as_string()),
                            }
                        }
                    }
                }
                Ok(Value::Str(text))
            }
            Expr::Exists(inner) => match self.eval_expr_with(inner, view) {
                Ok(_) => Ok(Value::Bool(true)),
                Err(e) if e.kind.caught_by_fallback() => Ok(Value::Bool(false)),
                Err(e) => Err(e),
            },
            Expr::NotExpr(inner) => {
                let value = self.eval_expr_with(inner, view)?;
                Ok(Value::Bool(!value.truthy()))
            }
            Expr::Import { path } => {
                let mut segments = path.split('.');
                let root = segments.next().expect("validated dotted path");
                let mut value = view.resolve_name(root).ok_or_else(|| {
                    EvalError::new(ErrorKind::Import, format!("no module named '{}'", root))
                })?;
                for segment in segments {
                    value = get_attr_with_item_fallback(&value, segment).map_err(|_| {
                        EvalError::new(
                            ErrorKind::Import,
                            format!("cannot import '{}' from '{}'", segment, path),
                        )
                    })?;
                }
                Ok(value)
            }
            Expr::Load { path } => {
                let loader = self.loader.ok_or_else(|| {
                    EvalError::new(ErrorKind::Import, "no template loader configured")
                })?;
                let program = loader.load(path).map_err(|e| {
                    EvalError::new(ErrorKind::Import, format!("cannot load {:?}: {}", path, e))
                })?;
                Ok(Value::Object(Arc::new(TemplateRef::new(program))))
            }
            Expr::Structure(inner) => {
                let value = self.eval_expr_with(inner, view)?;
                Ok(match value {
                    Value::None => Value::None,
                    Value::Default => Value::Default,
                    Value::Markup(m) => Value::Markup(m),
                    other => match other.html() {
                        Some(html) => Value::Markup(html),
                        None => Value::Markup(other.as_string()),
                    },
                })
            }
            Expr::Fallback(candidates) => {
                let mut last = None;
                for candidate in candidates {
                    match self.eval_expr_with(candidate, view) {
                        Ok(value) => return Ok(value),
                        Err(e) if e.kind.caught_by_fallback() => last = Some(e),
                        Err(e) => return Err(e),
                    }
                }
                Err(last.unwrap_or_else(|| EvalError::name("empty fallback chain")))
            }
        }
    }

    /// Evaluates with the error-tracking frame: failures become
    /// [`RenderError`]s citing the expression's source slice.
    fn wrap_eval(&self, info: &ExprInfo) -> Result<Value> {
        self.eval_expr(&info.expr).map_err(|e| self.wrap(e, info))
    }

    fn wrap(&self, e: EvalError, info: &ExprInfo) -> TalError {
        let runtime = e.kind == ErrorKind::Runtime;
        TalError::RenderError(Box::new(RenderError {
            kind: e.kind,
            message: e.message,
            expression: info.source.clone(),
            filename: self.program.filename.clone(),
            line: info.line,
            column: info.column,
            variables: if runtime { vec![] } else { self.scope.snapshot() },
            source_context: if runtime {
                None
            } else {
                self.source
                    .map(|src| SourceContext::from_source(src, info.line, info.column))
            },
            chain: vec![],
        }))
    }

    // -----------------------------------------------------------------
    // Step execution

    fn exec(&mut self, step: &Step) -> Result<()> {
        match step {
            Step::Nothing => Ok(()),
            Step::Sequence(steps) => {
                for s in steps {
                    self.exec(s)?;
                }
                Ok(())
            }
            Step::Text(text) => {
                self.out.push_str(text);
                Ok(())
            }
            Step::Interpolation { parts } => self.exec_interpolation(parts),
            Step::Element { plan, body } => self.exec_element(plan, body),
            Step::Define { bindings, body } => self.exec_define(bindings, body),
            Step::Condition { expr, body } => {
                let value = self.wrap_eval(expr)?;
                // `default` counts as truthy here.
                if value.truthy() {
                    self.exec(body)?;
                }
                Ok(())
            }
            Step::Repeat {
                targets,
                expr,
                body,
            } => self.exec_repeat(targets, expr, body),
            Step::Switch { expr, body } => {
                let value = self.wrap_eval(expr)?;
                self.switch_stack.push((value, false));
                let result = self.exec(body);
                self.switch_stack.pop();
                result
            }
            Step::Case { expr, body } => self.exec_case(expr, body),
            Step::Content {
                expr,
                structure,
                default_body,
            } => {
                let value = self.wrap_eval(expr)?;
                match value {
                    Value::Default => self.exec(default_body),
                    other => {
                        self.insert_value(&other, *structure);
                        Ok(())
                    }
                }
            }
            Step::OnError {
                body,
                handler,
                structure,
                static_tag,
            } => self.exec_on_error(body, handler, *structure, static_tag.as_ref()),
            Step::DefineMacro { body, .. } => {
                // Macro definitions render in place; the frame bounds
                // code-block assignments to the macro.
                self.scope.push_frame();
                let result = self.exec(body);
                self.scope.pop_frame();
                result
            }
            Step::UseMacro {
                expr,
                fills,
                extend,
            } => self.exec_use_macro(expr, fills, *extend),
            Step::DefineSlot { name, default_body } => self.exec_define_slot(name, default_body),
            Step::Translate { plan, body } => self.exec_translate(plan, body),
            Step::I18nName { name, body } => self.exec_i18n_name(name, body),
            Step::CodeBlock { assignments } => {
                for assignment in assignments {
                    let info = ExprInfo {
                        expr: Expr::Py(assignment.expr.clone()),
                        source: assignment.target.clone(),
                        line: 0,
                        column: 0,
                    };
                    let value = self.wrap_eval(&info)?;
                    self.scope.define_local(assignment.target.clone(), value);
                }
                Ok(())
            }
        }
    }

    fn exec_interpolation(&mut self, parts: &[TplPart]) -> Result<()> {
        for part in parts {
            match part {
                TplPart::Text(text) => self.out.push_str(text),
                TplPart::Expr(info) => {
                    let value = self.wrap_eval(info)?;
                    self.insert_value(&value, false);
                }
            }
        }
        Ok(())
    }

    /// Content-position insertion with the coercion rules: `None`,
    /// `False` and the default sentinel emit nothing; pre-escaped
    /// markup and structure values pass through; message-like objects
    /// go through the translation callable; everything else is
    /// stringified and escaped.
    fn insert_value(&mut self, value: &Value, structure: bool) {
        match value {
            Value::None | Value::Bool(false) | Value::Default => {}
            Value::Markup(markup) => self.out.push_str(markup),
            Value::Object(obj) => {
                if let Some(html) = obj.html() {
                    self.out.push_str(&html);
                } else if obj.message().is_some() {
                    let text = invoke_translation(
                        self.translator,
                        value,
                        None,
                        None,
                        None,
                        None,
                        None,
                    );
                    self.push_text(&text, structure);
                } else {
                    self.push_text(&obj.repr(), structure);
                }
            }
            other => self.push_text(&other.as_string(), structure),
        }
    }

    fn push_text(&mut self, text: &str, structure: bool) {
        if structure {
            self.out.push_str(text);
        } else {
            self.out.push_str(&escape_html(text));
        }
    }

    fn exec_define(&mut self, bindings: &[crate::program::DefineBinding], body: &Step) -> Result<()> {
        self.scope.push_frame();
        let result = (|| {
            for binding in bindings {
                let value = self.wrap_eval(&binding.expr)?;
                let assignments = self.unpack(&binding.targets, value, &binding.expr)?;
                for (name, v) in assignments {
                    match binding.scope {
                        DefineScope::Local => self.scope.define_local(name, v),
                        DefineScope::Global => self.scope.define_global(name, v),
                    }
                }
            }
            self.exec(body)
        })();
        self.scope.pop_frame();
        result
    }

    /// Positional tuple unpacking for `define` and `repeat` targets.
    fn unpack(
        &self,
        targets: &[String],
        value: Value,
        info: &ExprInfo,
    ) -> Result<Vec<(String, Value)>> {
        if targets.len() == 1 {
            return Ok(vec![(targets[0].clone(), value)]);
        }
        let items = match value {
            Value::Seq(items) => items,
            other => {
                return Err(self.wrap(
                    EvalError::type_error(format!(
                        "cannot unpack non-sequence '{}'",
                        other.type_name()
                    )),
                    info,
                ))
            }
        };
        if items.len() != targets.len() {
            return Err(self.wrap(
                EvalError::value(format!(
                    "expected {} values to unpack, got {}",
                    targets.len(),
                    items.len()
                )),
                info,
            ));
        }
        Ok(targets.iter().cloned().zip(items).collect())
    }

    fn exec_repeat(&mut self, targets: &[String], expr: &ExprInfo, body: &Step) -> Result<()> {
        let value = self.wrap_eval(expr)?;
        match value {
            // `default` leaves the content unchanged, once, without a
            // loop variable.
            Value::Default => return self.exec(body),
            Value::None => return Ok(()),
            _ => {}
        }
        let items = self.iterable(value, expr)?;
        let length = items.len();
        let repeat_name = targets[0].clone();

        self.scope.push_frame();
        let result = (|| {
            for (index, item) in items.iter().enumerate() {
                let state = Arc::new(RepeatState {
                    index,
                    length,
                    item: item.clone(),
                    prev: index.checked_sub(1).map(|p| items[p].clone()),
                    next: items.get(index + 1).cloned(),
                });
                self.repeat.push(repeat_name.clone(), state);
                let bound = self.unpack(targets, item.clone(), expr);
                let step_result = bound.and_then(|assignments| {
                    for (name, v) in assignments {
                        self.scope.define_local(name, v);
                    }
                    self.exec(body)
                });
                self.repeat.pop(&repeat_name);
                step_result?;
            }
            Ok(())
        })();
        // Loop variable and repeat entry never leak past the loop.
        self.scope.pop_frame();
        result
    }

    fn iterable(&self, value: Value, info: &ExprInfo) -> Result<Vec<Value>> {
        match value {
            Value::Seq(items) => Ok(items),
            Value::Map(map) => Ok(map.iter().map(|(k, _)| k.clone()).collect()),
            Value::Str(s) | Value::Markup(s) => {
                Ok(s.chars().map(|c| Value::Str(c.to_string())).collect())
            }
            other => Err(self.wrap(
                EvalError::type_error(format!("'{}' object is not iterable", other.type_name())),
                info,
            )),
        }
    }

    fn exec_case(&mut self, expr: &ExprInfo, body: &Step) -> Result<()> {
        let value = self.wrap_eval(expr)?;
        let Some((subject, matched)) = self.switch_stack.last() else {
            return Err(self.wrap(
                EvalError::new(ErrorKind::Runtime, "tal:case without active tal:switch"),
                expr,
            ));
        };
        if *matched {
            return Ok(());
        }
        let hit = matches!(value, Value::Default) || crate::value::values_equal(&value, subject);
        if hit {
            if let Some(top) = self.switch_stack.last_mut() {
                top.1 = true;
            }
            self.exec(body)?;
        }
        Ok(())
    }

    fn exec_on_error(
        &mut self,
        body: &Step,
        handler: &ExprInfo,
        structure: bool,
        static_tag: Option<&crate::program::StaticTag>,
    ) -> Result<()> {
        let mark = self.out.len();
        let scope_depth_before = self.switch_stack.len();
        match self.exec(body) {
            Ok(()) => Ok(()),
            Err(TalError::RenderError(failure)) => {
                if let Some(hook) = &self.settings.on_error_handler {
                    hook(&failure);
                }
                // Roll back partial output and substitute the element.
                self.out.truncate(mark);
                self.switch_stack.truncate(scope_depth_before);

                self.scope.push_frame();
                self.scope.define_local(
                    "error",
                    Value::Object(Arc::new(ErrorValue {
                        kind: failure.kind,
                        message: failure.message.clone(),
                    })),
                );
                let value = self.wrap_eval(handler);
                self.scope.pop_frame();
                let value = value?;

                if let Some(tag) = static_tag {
                    self.out.push_str(&tag.open);
                    self.insert_value(&value, structure);
                    if let Some(close) = &tag.close {
                        self.out.push_str(close);
                    }
                } else {
                    self.insert_value(&value, structure);
                }
                Ok(())
            }
            Err(other) => Err(other),
        }
    }

    fn exec_use_macro(
        &mut self,
        expr: &ExprInfo,
        fills: &[(String, Step)],
        extend: bool,
    ) -> Result<()> {
        let value = self.wrap_eval(expr)?;
        let def = match value {
            Value::Macro(def) => def,
            other => {
                return Err(self.wrap(
                    EvalError::type_error(format!(
                        "metal:use-macro expression must yield a macro, got '{}'",
                        other.type_name()
                    )),
                    expr,
                ))
            }
        };
        if self.macro_depth >= MAX_MACRO_DEPTH {
            return Err(self.wrap(
                EvalError::new(ErrorKind::Runtime, "macro recursion limit exceeded"),
                expr,
            ));
        }

        let saved_mask = self.slot_mask;
        if !extend {
            // An unrelated invocation: fillers from outer macros must
            // not reach into this one.
            self.slot_mask = self.slot_stack.len();
        }
        self.slot_stack.push(fills.to_vec());
        self.macro_depth += 1;
        self.scope.push_frame();

        let result = self.exec(&def.body);

        self.scope.pop_frame();
        self.macro_depth -= 1;
        self.slot_stack.pop();
        self.slot_mask = saved_mask;
        result
    }

    fn exec_define_slot(&mut self, name: &str, default_body: &Step) -> Result<()> {
        // Outermost filler wins: search from the oldest visible layer.
        let mut found: Option<(usize, Step)> = None;
        for index in self.slot_mask..self.slot_stack.len() {
            if let Some((_, step)) = self.slot_stack[index].iter().find(|(n, _)| n == name) {
                found = Some((index, step.clone()));
                break;
            }
        }
        match found {
            None => self.exec(default_body),
            Some((layer, fill)) => {
                // While the filler renders, only layers closer to the
                // macro may fill its inner slots.
                let saved_mask = self.slot_mask;
                self.slot_mask = layer + 1;
                let result = self.exec(&fill);
                self.slot_mask = saved_mask;
                result
            }
        }
    }

    fn exec_translate(&mut self, plan: &TranslatePlan, body: &Step) -> Result<()> {
        // Capture the body with `${name}` placeholders and collect the
        // name mapping.
        let outer = std::mem::take(&mut self.out);
        self.mapping_stack.push(ValueMap::new());
        let captured = self.exec(body);
        let mapping = self.mapping_stack.pop().unwrap_or_default();
        let inner = std::mem::replace(&mut self.out, outer);
        captured?;

        let normalized = normalize_msgid(&inner);
        let msgid_value = match (&plan.data, &plan.msgid) {
            (Some(data), _) => self.wrap_eval(data)?,
            (None, Some(msgid)) => Value::Str(msgid.clone()),
            (None, None) => Value::Str(normalized.clone()),
        };

        let mapping_ref = if mapping.is_empty() {
            None
        } else {
            Some(&mapping)
        };
        let text = invoke_translation(
            self.translator,
            &msgid_value,
            plan.domain.as_deref(),
            mapping_ref,
            plan.context.as_deref(),
            plan.target_lang.as_deref(),
            Some(&normalized),
        );
        self.out.push_str(&text);
        Ok(())
    }

    fn exec_i18n_name(&mut self, name: &str, body: &Step) -> Result<()> {
        if self.mapping_stack.is_empty() {
            return self.exec(body);
        }
        let outer = std::mem::take(&mut self.out);
        let rendered = self.exec(body);
        let inner = std::mem::replace(&mut self.out, outer);
        rendered?;
        if let Some(mapping) = self.mapping_stack.last_mut() {
            mapping.insert_str(name, Value::Markup(inner));
        }
        self.out.push_str("${");
        self.out.push_str(name);
        self.out.push('}');
        Ok(())
    }

    // -----------------------------------------------------------------
    // Elements and the attribute writer

    fn exec_element(&mut self, plan: &ElementPlan, body: &Step) -> Result<()> {
        let omit = match &plan.omit {
            OmitPlan::Never => false,
            OmitPlan::Always => true,
            OmitPlan::Expr(info) => self.wrap_eval(info)?.truthy(),
        };
        if !omit {
            self.out.push('<');
            self.out.push_str(&plan.tag);
            self.write_attributes(plan)?;
            self.out.push_str(&plan.close);
        }
        self.exec(body)?;
        if !omit {
            if let Some(end) = &plan.end_tag {
                self.out.push_str(end);
            }
        }
        Ok(())
    }

    fn write_attributes(&mut self, plan: &ElementPlan) -> Result<()> {
        let mut emitted: HashSet<String> = HashSet::new();
        for attr in &plan.attrs {
            self.write_attribute(attr, &mut emitted)?;
        }
        for splice in &plan.splices {
            let value = self.wrap_eval(splice)?;
            match value {
                Value::None | Value::Default => {}
                Value::Map(map) => {
                    for (key, item) in map.iter() {
                        let name = key.as_string();
                        if emitted.contains(&name.to_ascii_lowercase()) {
                            continue;
                        }
                        let boolean = self
                            .settings
                            .boolean_attributes
                            .contains(&name.to_ascii_lowercase());
                        self.emit_dynamic_attribute(
                            &name, " ", '"', item, boolean, None, None, &mut emitted,
                        );
                    }
                }
                other => {
                    return Err(self.wrap(
                        EvalError::type_error(format!(
                            "tal:attributes mapping must be a dict, got '{}'",
                            other.type_name()
                        )),
                        splice,
                    ))
                }
            }
        }
        Ok(())
    }

    fn write_attribute(&mut self, attr: &AttrPlan, emitted: &mut HashSet<String>) -> Result<()> {
        if attr.minimized {
            self.out.push_str(&attr.leading);
            self.out.push_str(&attr.name);
            emitted.insert(attr.name.to_ascii_lowercase());
            return Ok(());
        }
        match &attr.value {
            AttrValuePlan::Static(text) => {
                let rendered = match &attr.translate {
                    Some(plan) => {
                        let decoded = crate::ast::decode_entities(text);
                        escape_attribute(&self.translate_text(plan, &decoded))
                    }
                    None => text.clone(),
                };
                self.emit_raw_attribute(&attr.leading, &attr.name, attr.quote, &rendered);
                emitted.insert(attr.name.to_ascii_lowercase());
            }
            AttrValuePlan::Dynamic(info) => {
                let value = self.wrap_eval(info)?;
                if let Value::Map(map) = &value {
                    // A mapping contributes its entries in place.
                    for (key, item) in map.iter() {
                        let name = key.as_string();
                        if emitted.contains(&name.to_ascii_lowercase()) {
                            continue;
                        }
                        let boolean = self
                            .settings
                            .boolean_attributes
                            .contains(&name.to_ascii_lowercase());
                        self.emit_dynamic_attribute(
                            &name, " ", '"', item, boolean, None, None, emitted,
                        );
                    }
                    return Ok(());
                }
                self.emit_dynamic_attribute(
                    &attr.name,
                    &attr.leading,
                    attr.quote,
                    &value,
                    attr.boolean,
                    attr.static_fallback.as_deref(),
                    attr.translate.as_ref(),
                    emitted,
                );
            }
            AttrValuePlan::Parts(parts) => {
                // A single-expression value follows the dynamic rules;
                // mixed parts compose into text.
                if let [TplPart::Expr(info)] = parts.as_slice() {
                    let value = self.wrap_eval(info)?;
                    self.emit_dynamic_attribute(
                        &attr.name,
                        &attr.leading,
                        attr.quote,
                        &value,
                        attr.boolean,
                        None,
                        attr.translate.as_ref(),
                        emitted,
                    );
                    return Ok(());
                }
                let mut text = String::new();
                for part in parts {
                    match part {
                        TplPart::Text(t) => text.push_str(t),
                        TplPart::Expr(info) => {
                            let value = self.wrap_eval(info)?;
                            match value {
                                Value::None | Value::Default => {}
                                other => text.push_str(&other.as_string()),
                            }
                        }
                    }
                }
                let rendered = match &attr.translate {
                    Some(plan) => self.translate_text(plan, &text),
                    None => text,
                };
                self.emit_raw_attribute(
                    &attr.leading,
                    &attr.name,
                    attr.quote,
                    &escape_attribute(&rendered),
                );
                emitted.insert(attr.name.to_ascii_lowercase());
            }
        }
        Ok(())
    }

    /// The dynamic attribute algorithm: `None` drops, `default`
    /// reverts to the static value (drop if absent), boolean names
    /// render `name="name"` or drop, anything else is stringified and
    /// escaped.
    #[allow(clippy::too_many_arguments)]
    fn emit_dynamic_attribute(
        &mut self,
        name: &str,
        leading: &str,
        quote: char,
        value: &Value,
        boolean: bool,
        static_fallback: Option<&str>,
        translate: Option<&TranslatePlan>,
        emitted: &mut HashSet<String>,
    ) {
        if boolean {
            let keep = match value {
                Value::Default => static_fallback.is_some(),
                other => other.truthy(),
            };
            if keep {
                let canonical = name.to_ascii_lowercase();
                self.emit_raw_attribute(leading, name, quote, &canonical);
                emitted.insert(canonical);
            }
            return;
        }
        match value {
            Value::None => {}
            Value::Default => {
                if let Some(text) = static_fallback {
                    self.emit_raw_attribute(leading, name, quote, text);
                    emitted.insert(name.to_ascii_lowercase());
                }
            }
            other => {
                let mut text = other.as_string();
                if let Some(plan) = translate {
                    text = self.translate_text(plan, &text);
                }
                self.emit_raw_attribute(leading, name, quote, &escape_attribute(&text));
                emitted.insert(name.to_ascii_lowercase());
            }
        }
    }

    fn emit_raw_attribute(&mut self, leading: &str, name: &str, quote: char, value: &str) {
        self.out.push_str(leading);
        self.out.push_str(name);
        self.out.push('=');
        self.out.push(quote);
        self.out.push_str(value);
        self.out.push(quote);
    }

    fn translate_text(&self, plan: &TranslatePlan, text: &str) -> String {
        let msgid = plan
            .msgid
            .clone()
            .unwrap_or_else(|| normalize_msgid(text));
        if msgid.is_empty() {
            return text.to_string();
        }
        invoke_translation(
            self.translator,
            &Value::Str(msgid),
            plan.domain.as_deref(),
            None,
            plan.context.as_deref(),
            plan.target_lang.as_deref(),
            Some(text),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codegen::compile_document;
    use crate::i18n::{NullTranslator, TableTranslator};
    use crate::parser::parse;
    use crate::tales::ExpressionRegistry;

    fn render_with(source: &str, vars: ValueMap, settings: &Settings) -> Result<String> {
        let doc = parse(source)?;
        let registry = ExpressionRegistry::with_defaults(&settings.default_expression);
        let program = compile_document(&doc, settings, &registry, None)?;
        let kwargs = ValueMap::new();
        render_program(
            &program,
            &RenderParams {
                vars: &vars,
                translator: &NullTranslator,
                kwargs: &kwargs,
                loader: None,
                source: Some(source),
                settings,
            },
        )
    }

    fn render(source: &str, vars: ValueMap) -> String {
        render_with(source, vars, &Settings::default()).unwrap()
    }

    fn vars(pairs: &[(&str, Value)]) -> ValueMap {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_content_insertion() {
        let out = render(
            r#"<p tal:content="'Hello, ' + name">x</p>"#,
            vars(&[("name", Value::Str("World".into()))]),
        );
        assert_eq!(out, "<p>Hello, World</p>");
    }

    #[test]
    fn test_repeat_with_repeat_dict() {
        let out = render(
            r#"<ul><li tal:repeat="i range(3)" tal:content="repeat.i.number"/></ul>"#,
            vars(&[]),
        );
        assert_eq!(out, "<ul><li>1</li><li>2</li><li>3</li></ul>");
    }

    #[test]
    fn test_attribute_none_and_default() {
        let out = render(r#"<a tal:attributes="href None" href="/x">k</a>"#, vars(&[]));
        assert_eq!(out, "<a>k</a>");
        let out = render(
            r#"<a tal:attributes="href default" href="/x">k</a>"#,
            vars(&[]),
        );
        assert_eq!(out, r#"<a href="/x">k</a>"#);
    }

    #[test]
    fn test_boolean_attributes() {
        let out = render(
            r#"<input type="checkbox" tal:attributes="checked ok"/>"#,
            vars(&[("ok", Value::Bool(true))]),
        );
        assert_eq!(out, r#"<input type="checkbox" checked="checked" />"#);
        let out = render(
            r#"<input type="checkbox" tal:attributes="checked ok"/>"#,
            vars(&[("ok", Value::Bool(false))]),
        );
        assert_eq!(out, r#"<input type="checkbox" />"#);
    }

    #[test]
    fn test_interpolation_escaping_and_structure() {
        let out = render("<div>${'A & B'}</div>", vars(&[]));
        assert_eq!(out, "<div>A &amp; B</div>");
        let out = render("<div>${structure:'<em>x</em>'}</div>", vars(&[]));
        assert_eq!(out, "<div><em>x</em></div>");
    }

    #[test]
    fn test_repeat_scope_does_not_leak() {
        let out = render(
            r#"<div><p tal:repeat="i range(2)" tal:content="i">x</p><span tal:condition="exists:i">leak</span></div>"#,
            vars(&[]),
        );
        assert_eq!(out, "<div><p>0</p><p>1</p></div>");
    }

    #[test]
    fn test_switch_first_match() {
        let source = r#"<div tal:switch="x"><p tal:case="1">one</p><p tal:case="1">again</p><p tal:case="default">other</p></div>"#;
        let out = render(source, vars(&[("x", Value::Int(1))]));
        assert_eq!(out, "<div><p>one</p></div>");
        let out = render(source, vars(&[("x", Value::Int(9))]));
        assert_eq!(out, "<div><p>other</p></div>");
    }

    #[test]
    fn test_pipe_fallback() {
        let out = render(
            r#"<p tal:content="missing | also.missing | 'fallback'">x</p>"#,
            vars(&[]),
        );
        assert_eq!(out, "<p>fallback</p>");
    }

    #[test]
    fn test_omit_tag() {
        let out = render(r#"<div tal:omit-tag="">kept</div>"#, vars(&[]));
        assert_eq!(out, "kept");
        let out = render(r#"<div tal:omit-tag="False">kept</div>"#, vars(&[]));
        assert_eq!(out, "<div>kept</div>");
    }

    #[test]
    fn test_define_scopes() {
        let out = render(
            r#"<div tal:define="x 1"><p tal:define="x 2" tal:content="x">i</p><p tal:content="x">o</p></div>"#,
            vars(&[]),
        );
        assert_eq!(out, "<div><p>2</p><p>1</p></div>");
    }

    #[test]
    fn test_replace_and_default() {
        let out = render(r#"<p tal:replace="'gone'">x</p>"#, vars(&[]));
        assert_eq!(out, "gone");
        let out = render(r#"<p tal:replace="default">x</p>"#, vars(&[]));
        assert_eq!(out, "<p>x</p>");
    }

    #[test]
    fn test_on_error_substitution() {
        let out = render(
            r#"<p tal:on-error="string:recovered: ${error.type}" tal:content="missing">x</p>"#,
            vars(&[]),
        );
        assert_eq!(out, "<p>recovered: NameError</p>");
    }

    #[test]
    fn test_macro_slot_filling() {
        let source = concat!(
            r#"<html metal:define-macro="main">"#,
            r#"<body><div metal:define-slot="content">fallback</div></body></html>"#,
            r#"<x metal:use-macro="template.macros['main']">"#,
            r#"<p metal:fill-slot="content">mine</p></x>"#,
        );
        // Define the macro and invoke it from the same document via a
        // template self-reference bound as a variable.
        let doc = parse(source).unwrap();
        let settings = Settings::default();
        let registry = ExpressionRegistry::with_defaults("python");
        let program = compile_document(&doc, &settings, &registry, None).unwrap();
        let program = Arc::new(program);
        let mut v = ValueMap::new();
        v.insert_str(
            "template",
            Value::Object(Arc::new(TemplateRef::new(program.clone()))),
        );
        let kwargs = ValueMap::new();
        let out = render_program(
            &program,
            &RenderParams {
                vars: &v,
                translator: &NullTranslator,
                kwargs: &kwargs,
                loader: None,
                source: None,
                settings: &settings,
            },
        )
        .unwrap();
        // The macro renders once at definition (with fallback) and once
        // at the call site (with the filler).
        assert_eq!(
            out,
            concat!(
                "<html><body><div>fallback</div></body></html>",
                "<html><body><p>mine</p></body></html>",
            )
        );
    }

    #[test]
    fn test_i18n_translate_with_names() {
        let mut table = TableTranslator::new();
        table.insert("greeting", "Bonjour ${who}!");
        let doc = parse(
            r#"<p i18n:translate="greeting">Hello <b i18n:name="who">World</b>!</p>"#,
        )
        .unwrap();
        let settings = Settings::default();
        let registry = ExpressionRegistry::with_defaults("python");
        let program = compile_document(&doc, &settings, &registry, None).unwrap();
        let v = ValueMap::new();
        let kwargs = ValueMap::new();
        let out = render_program(
            &program,
            &RenderParams {
                vars: &v,
                translator: &table,
                kwargs: &kwargs,
                loader: None,
                source: None,
                settings: &settings,
            },
        )
        .unwrap();
        assert_eq!(out, "<p>Bonjour <b>World</b>!</p>");
    }

    #[test]
    fn test_untranslated_capture_keeps_markup() {
        let out = render(
            r#"<p i18n:translate="">Hello <b i18n:name="who">World</b>!</p>"#,
            vars(&[]),
        );
        assert_eq!(out, "<p>Hello <b>World</b>!</p>");
    }

    #[test]
    fn test_code_block() {
        let out = render("<?python x = 2 * 21 ?><p>${x}</p>", vars(&[]));
        assert_eq!(out, "<p>42</p>");
    }

    #[test]
    fn test_dollar_dollar_literal() {
        let out = render("<p>$${x} costs $$5</p>", vars(&[]));
        assert_eq!(out, "<p>${x} costs $5</p>");
    }

    #[test]
    fn test_render_error_cites_expression() {
        let err = render_with(
            "<p tal:content=\"1 // 0\">x</p>",
            ValueMap::new(),
            &Settings::default(),
        )
        .unwrap_err();
        let TalError::RenderError(re) = err else {
            panic!("expected render error, got {:?}", err);
        };
        assert_eq!(re.original_kind(), ErrorKind::ZeroDivision);
        assert_eq!(re.expression, "1 // 0");
        assert_eq!(re.line, 1);
    }

    #[test]
    fn test_kwargs_shadow_builtins_via_args_layer() {
        let doc = parse(r#"<p tal:content="len">x</p>"#).unwrap();
        let settings = Settings::default();
        let registry = ExpressionRegistry::with_defaults("python");
        let program = compile_document(&doc, &settings, &registry, None).unwrap();
        let v = ValueMap::new();
        let mut kwargs = ValueMap::new();
        kwargs.insert_str("len", Value::Int(7));
        let out = render_program(
            &program,
            &RenderParams {
                vars: &v,
                translator: &NullTranslator,
                kwargs: &kwargs,
                loader: None,
                source: None,
                settings: &settings,
            },
        )
        .unwrap();
        assert_eq!(out, "<p>7</p>");
    }
}
