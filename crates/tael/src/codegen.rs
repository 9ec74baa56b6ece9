// Copyright 2019-2026 Maravilla Labs, operated by SOLUTAS GmbH, Switzerland
// SPDX-License-Identifier: Apache-2.0
// SPDX-License-Identifier: MIT

//! Code generation: annotated element tree to compiled [`Program`].
//!
//! The generator walks the parsed document, binds control statements,
//! and lowers every element into the instruction tree the renderer
//! interprets. The canonical statement order is realized structurally:
//! each element's instructions nest as
//!
//! ```text
//! Define( Switch( Condition( Repeat( Case( OnError( element ))))))
//! ```
//!
//! regardless of attribute source order. Macro definitions are
//! registered in the program's macro table and also render in place;
//! `use-macro` elements compile to an invocation carrying the fills
//! collected from their `fill-slot` descendants.
//!
//! The translation attributes `i18n:domain`, `i18n:context`,
//! `i18n:source` and `i18n:target` are inherited lexically: the
//! generator threads them through the walk and resolves them into each
//! translation site at compile time.

use crate::ast::{AttributeRec, Document, Element, Node};
use crate::config::Settings;
use crate::error::{Result, TalError};
use crate::interp::{split_interpolation, RawPart};
use crate::program::{
    AttrPlan, AttrValuePlan, DefineBinding, ElementPlan, ExprInfo, MacroDef, OmitPlan, Program,
    StaticTag, Step, TplPart, TranslatePlan,
};
use crate::pyexpr::parse_assignments;
use crate::statements::{bind, element_control_ns, BoundStatements, Statement};
use crate::tales::ExpressionRegistry;
use crate::token::{CommentVariant, Span};
use crate::transform::{
    parse_attributes_payload, parse_define_payload, parse_i18n_attributes_payload,
    parse_insertion_payload, parse_repeat_payload, validate_statements,
};

/// Lexically inherited translation context.
#[derive(Debug, Clone, Default)]
struct I18nCtx {
    domain: Option<String>,
    context: Option<String>,
    source: Option<String>,
    target: Option<String>,
}

impl I18nCtx {
    fn plan(&self, msgid: Option<String>) -> TranslatePlan {
        TranslatePlan {
            msgid,
            domain: self.domain.clone(),
            context: self.context.clone(),
            source_lang: self.source.clone(),
            target_lang: self.target.clone(),
            data: None,
        }
    }
}

/// Per-position compilation context.
#[derive(Debug, Clone, Default)]
struct Ctx {
    /// `${...}` lowering active (see `meta:interpolation`).
    interpolation: bool,
    /// A `tal:switch` governs this position.
    switch_active: bool,
    /// An `i18n:translate` capture is already open.
    in_translate: bool,
    /// Inherited translation context.
    i18n: I18nCtx,
}

/// Compiles a parsed document into a program.
pub fn compile_document(
    doc: &Document,
    settings: &Settings,
    registry: &ExpressionRegistry,
    filename: Option<&str>,
) -> Result<Program> {
    let mut codegen = Codegen {
        settings,
        registry,
        macros: Vec::new(),
    };
    let ctx = Ctx {
        interpolation: true,
        ..Ctx::default()
    };
    let root = codegen.compile_nodes(&doc.nodes, &ctx)?;
    Ok(Program {
        root,
        macros: codegen.macros,
        filename: filename.map(String::from),
    })
}

struct Codegen<'a> {
    settings: &'a Settings,
    registry: &'a ExpressionRegistry,
    macros: Vec<MacroDef>,
}

impl<'a> Codegen<'a> {
    fn expr_info(&self, source: &str, span: Span) -> Result<ExprInfo> {
        let expr = self.registry.compile(source)?;
        Ok(ExprInfo {
            expr,
            source: source.trim().to_string(),
            line: span.line,
            column: span.column,
        })
    }

    /// Lowers interpolated text into parts, `$$` already reduced.
    fn lower_parts(&self, text: &str, span: Span) -> Result<Vec<TplPart>> {
        let mut parts = Vec::new();
        for part in split_interpolation(text)? {
            match part {
                RawPart::Literal(text) => parts.push(TplPart::Text(text)),
                RawPart::Expression(source) => {
                    parts.push(TplPart::Expr(self.expr_info(&source, span)?))
                }
            }
        }
        Ok(parts)
    }

    /// Concatenates parts back into plain text when nothing dynamic
    /// survived the lowering (e.g. only `$$` escapes were present).
    fn collapse_parts(parts: Vec<TplPart>) -> std::result::Result<String, Vec<TplPart>> {
        if parts.iter().any(|p| matches!(p, TplPart::Expr(_))) {
            return Err(parts);
        }
        let mut text = String::new();
        for part in parts {
            if let TplPart::Text(t) = part {
                text.push_str(&t);
            }
        }
        Ok(text)
    }

    fn compile_nodes(&mut self, nodes: &[Node], ctx: &Ctx) -> Result<Step> {
        let mut steps = Vec::with_capacity(nodes.len());
        for node in nodes {
            steps.push(self.compile_node(node, ctx)?);
        }
        Ok(Step::sequence(steps))
    }

    fn compile_node(&mut self, node: &Node, ctx: &Ctx) -> Result<Step> {
        match node {
            Node::Element(el) => self.compile_element(el, ctx, false),
            Node::Text { content, span } => self.compile_text(content, *span, ctx),
            Node::EntityRef { text, .. } => Ok(Step::Text(text.clone())),
            Node::Comment {
                body,
                variant,
                span,
            } => self.compile_comment(body, *variant, *span, ctx),
            Node::Pi {
                target,
                content,
                span,
            } => self.compile_pi(target, content, *span),
            Node::CData { text, .. } | Node::Doctype { text, .. } | Node::XmlDecl { text, .. } => {
                Ok(Step::Text(text.clone()))
            }
        }
    }

    fn compile_text(&self, content: &str, span: Span, ctx: &Ctx) -> Result<Step> {
        let step = if ctx.interpolation && content.contains('$') {
            match Self::collapse_parts(self.lower_parts(content, span)?) {
                Ok(text) => Step::Text(text),
                Err(parts) => Step::Interpolation { parts },
            }
        } else {
            Step::Text(content.to_string())
        };
        // Unmarked literal text translates implicitly when configured.
        if self.settings.implicit_i18n_translate
            && !ctx.in_translate
            && matches!(&step, Step::Text(t) if !t.trim().is_empty())
        {
            return Ok(Step::Translate {
                plan: ctx.i18n.plan(None),
                body: Box::new(step),
            });
        }
        Ok(step)
    }

    fn compile_comment(
        &self,
        body: &str,
        variant: CommentVariant,
        span: Span,
        ctx: &Ctx,
    ) -> Result<Step> {
        match variant {
            CommentVariant::Drop => Ok(Step::Nothing),
            CommentVariant::Verbatim => Ok(Step::Text(format!("<!--{}-->", body))),
            CommentVariant::Standard => {
                let interpolate = ctx.interpolation
                    && self.settings.enable_comment_interpolation
                    && body.contains('$');
                if interpolate {
                    match Self::collapse_parts(self.lower_parts(body, span)?) {
                        Ok(text) => Ok(Step::Text(format!("<!--{}-->", text))),
                        Err(parts) => Ok(Step::sequence(vec![
                            Step::Text("<!--".to_string()),
                            Step::Interpolation { parts },
                            Step::Text("-->".to_string()),
                        ])),
                    }
                } else {
                    Ok(Step::Text(format!("<!--{}-->", body)))
                }
            }
        }
    }

    fn compile_pi(&self, target: &str, content: &str, span: Span) -> Result<Step> {
        if target == "python" {
            let assignments = parse_assignments(content).map_err(|e| match e {
                TalError::ExpressionError {
                    message,
                    expression,
                } => TalError::ExpressionError {
                    message: format!("{} (line {})", message, span.line),
                    expression,
                },
                other => other,
            })?;
            return Ok(Step::CodeBlock { assignments });
        }
        Ok(Step::Text(format!("<?{}{}?>", target, content)))
    }

    fn compile_element(&mut self, el: &Element, ctx: &Ctx, allow_fill: bool) -> Result<Step> {
        let bound = bind(el, self.settings)?;
        validate_statements(&bound)?;

        // Lexically scoped adjustments apply to the element itself and
        // everything below it.
        let mut ctx = ctx.clone();
        for statement in &bound.statements {
            match statement {
                Statement::Interpolation { enabled, .. } => ctx.interpolation = *enabled,
                Statement::Domain { name, .. } => ctx.i18n.domain = Some(name.clone()),
                Statement::Context { name, .. } => ctx.i18n.context = Some(name.clone()),
                Statement::Source { lang, .. } => ctx.i18n.source = Some(lang.clone()),
                Statement::Target { lang, .. } => ctx.i18n.target = Some(lang.clone()),
                _ => {}
            }
        }

        if let Some(Statement::FillSlot { span, .. }) = bound
            .find(|s| matches!(s, Statement::FillSlot { .. }))
        {
            if !allow_fill {
                return Err(TalError::language(
                    "metal:fill-slot must be a descendant of a metal:use-macro element",
                    span.line,
                    span.column,
                ));
            }
        }

        // The element core: either a macro invocation or the element
        // itself with its attribute writer and body.
        let macro_use = bound.statements.iter().find_map(|s| match s {
            Statement::UseMacro { expr, span } => Some((expr.clone(), *span, false)),
            Statement::ExtendMacro { expr, span } => Some((expr.clone(), *span, true)),
            _ => None,
        });

        let mut core = match macro_use {
            Some((expr, span, extend)) => {
                let mut fills = Vec::new();
                self.collect_fills(&el.children, &ctx, &mut fills)?;
                Step::UseMacro {
                    expr: self.expr_info(&expr, span)?,
                    fills,
                    extend,
                }
            }
            None => self.compile_plain_element(el, &bound, &ctx)?,
        };

        // tal:replace trades the whole element for the expression value;
        // `default` brings the element back.
        if let Some(Statement::Replace { payload, span }) =
            bound.find(|s| matches!(s, Statement::Replace { .. }))
        {
            let spec = parse_insertion_payload(payload, *span)?;
            core = Step::Content {
                expr: self.expr_info(&spec.expr_source, *span)?,
                structure: spec.structure,
                default_body: Box::new(core),
            };
        }

        if let Some(Statement::Name { name, .. }) = bound.find(|s| matches!(s, Statement::Name { .. }))
        {
            core = Step::I18nName {
                name: name.clone(),
                body: Box::new(core),
            };
        }

        if let Some(Statement::OnError { payload, span }) =
            bound.find(|s| matches!(s, Statement::OnError { .. }))
        {
            let spec = parse_insertion_payload(payload, *span)?;
            core = Step::OnError {
                body: Box::new(core),
                handler: self.expr_info(&spec.expr_source, *span)?,
                structure: spec.structure,
                static_tag: self.static_tag(el, &bound),
            };
        }

        if let Some(Statement::Case { expr, span }) = bound.find(|s| matches!(s, Statement::Case { .. }))
        {
            if !ctx.switch_active {
                return Err(TalError::language(
                    "tal:case requires an enclosing tal:switch",
                    span.line,
                    span.column,
                ));
            }
            core = Step::Case {
                expr: self.expr_info(expr, *span)?,
                body: Box::new(core),
            };
        }

        if let Some(Statement::Repeat { payload, span }) =
            bound.find(|s| matches!(s, Statement::Repeat { .. }))
        {
            let spec = parse_repeat_payload(payload, self.settings, *span)?;
            core = Step::Repeat {
                targets: spec.targets,
                expr: self.expr_info(&spec.expr_source, *span)?,
                body: Box::new(core),
            };
        }

        if let Some(Statement::Condition { expr, span }) =
            bound.find(|s| matches!(s, Statement::Condition { .. }))
        {
            core = Step::Condition {
                expr: self.expr_info(expr, *span)?,
                body: Box::new(core),
            };
        }

        if let Some(Statement::Switch { expr, span }) =
            bound.find(|s| matches!(s, Statement::Switch { .. }))
        {
            core = Step::Switch {
                expr: self.expr_info(expr, *span)?,
                body: Box::new(core),
            };
        }

        if let Some(Statement::Define { payload, span }) =
            bound.find(|s| matches!(s, Statement::Define { .. }))
        {
            let items = parse_define_payload(payload, self.settings, *span)?;
            let mut bindings = Vec::with_capacity(items.len());
            for item in items {
                bindings.push(DefineBinding {
                    scope: item.scope,
                    targets: item.targets,
                    expr: self.expr_info(&item.expr_source, *span)?,
                });
            }
            core = Step::Define {
                bindings,
                body: Box::new(core),
            };
        }

        if let Some(Statement::DefineSlot { name, .. }) =
            bound.find(|s| matches!(s, Statement::DefineSlot { .. }))
        {
            core = Step::DefineSlot {
                name: name.clone(),
                default_body: Box::new(core),
            };
        }

        if let Some(Statement::DefineMacro { name, .. }) =
            bound.find(|s| matches!(s, Statement::DefineMacro { .. }))
        {
            self.macros.push(MacroDef {
                name: name.clone(),
                body: core.clone(),
                slots: collect_slot_names(&core),
            });
            core = Step::DefineMacro {
                name: name.clone(),
                body: Box::new(core),
            };
        }

        Ok(core)
    }

    /// The element itself: attribute writer plan, body, content.
    fn compile_plain_element(
        &mut self,
        el: &Element,
        bound: &BoundStatements,
        ctx: &Ctx,
    ) -> Result<Step> {
        let mut plan = self.element_plan(el, bound, ctx)?;

        let has_switch = bound
            .statements
            .iter()
            .any(|s| matches!(s, Statement::Switch { .. }));
        let child_ctx = Ctx {
            switch_active: has_switch,
            ..ctx.clone()
        };
        let mut inner = self.compile_nodes(&el.children, &child_ctx)?;

        if let Some(Statement::Content { payload, span }) =
            bound.find(|s| matches!(s, Statement::Content { .. }))
        {
            let spec = parse_insertion_payload(payload, *span)?;
            inner = Step::Content {
                expr: self.expr_info(&spec.expr_source, *span)?,
                structure: spec.structure,
                default_body: Box::new(inner),
            };
            // A self-closed element grows a tag pair to hold content.
            if el.self_closing {
                plan.close = ">".to_string();
                plan.end_tag = Some(format!("</{}>", el.raw_name));
            }
        }

        // i18n:translate (and i18n:data) capture the element content.
        let translate = bound.find(|s| matches!(s, Statement::Translate { .. }));
        let data = bound.find(|s| matches!(s, Statement::Data { .. }));
        if translate.is_some() || data.is_some() {
            let msgid = match translate {
                Some(Statement::Translate { msgid, .. }) if !msgid.is_empty() => {
                    Some(msgid.clone())
                }
                _ => None,
            };
            let mut plan = ctx.i18n.plan(msgid);
            if let Some(Statement::Data { expr, span }) = data {
                plan.data = Some(self.expr_info(expr, *span)?);
            }
            inner = Step::Translate {
                plan,
                body: Box::new(inner),
            };
        }

        Ok(Step::Element {
            plan,
            body: Box::new(inner),
        })
    }

    fn element_plan(
        &self,
        el: &Element,
        bound: &BoundStatements,
        ctx: &Ctx,
    ) -> Result<ElementPlan> {
        // i18n:attributes pairs, by lowercased attribute name.
        let mut translated: Vec<(String, Option<String>)> = Vec::new();
        if let Some(Statement::I18nAttributes { payload, .. }) =
            bound.find(|s| matches!(s, Statement::I18nAttributes { .. }))
        {
            translated = parse_i18n_attributes_payload(payload);
        }
        let translate_plan_for = |name: &str, explicit: &[(String, Option<String>)]| {
            for (attr, msgid) in explicit {
                if attr.eq_ignore_ascii_case(name) {
                    return Some(ctx.i18n.plan(msgid.clone()));
                }
            }
            if self
                .settings
                .implicit_i18n_attributes
                .contains(&name.to_ascii_lowercase())
            {
                return Some(ctx.i18n.plan(None));
            }
            None
        };

        let mut attrs: Vec<AttrPlan> = Vec::new();
        for (index, attr) in el.attributes.iter().enumerate() {
            if bound.stripped.contains(&index) {
                continue;
            }
            attrs.push(self.static_attr_plan(attr, ctx, translate_plan_for(&attr.name.local, &translated))?);
        }

        // tal:attributes rewrites and additions.
        let mut splices = Vec::new();
        if let Some(Statement::Attributes { payload, span }) =
            bound.find(|s| matches!(s, Statement::Attributes { .. }))
        {
            for item in parse_attributes_payload(payload, *span)? {
                match item.name {
                    None => splices.push(self.expr_info(&item.expr_source, *span)?),
                    Some(name) => {
                        let expr = self.expr_info(&item.expr_source, *span)?;
                        match attrs
                            .iter_mut()
                            .find(|p| p.name.eq_ignore_ascii_case(&name))
                        {
                            Some(plan) => {
                                // The directive's casing wins; the static
                                // value becomes the `default` fallback.
                                plan.static_fallback = match &plan.value {
                                    AttrValuePlan::Static(text) if !plan.minimized => {
                                        Some(text.clone())
                                    }
                                    _ => None,
                                };
                                plan.name = name.clone();
                                plan.value = AttrValuePlan::Dynamic(expr);
                                plan.minimized = false;
                                plan.boolean = self.is_boolean(&name);
                            }
                            None => attrs.push(AttrPlan {
                                boolean: self.is_boolean(&name),
                                translate: translate_plan_for(&name, &translated),
                                name,
                                leading: " ".to_string(),
                                quote: '"',
                                value: AttrValuePlan::Dynamic(expr),
                                minimized: false,
                                static_fallback: None,
                            }),
                        }
                    }
                }
            }
        }

        let omit = if element_control_ns(el).is_some() {
            OmitPlan::Always
        } else {
            match bound.find(|s| matches!(s, Statement::OmitTag { .. })) {
                Some(Statement::OmitTag { expr, span }) => {
                    if expr.trim().is_empty() {
                        OmitPlan::Always
                    } else {
                        OmitPlan::Expr(self.expr_info(expr, *span)?)
                    }
                }
                _ => OmitPlan::Never,
            }
        };

        Ok(ElementPlan {
            tag: el.raw_name.clone(),
            attrs,
            splices,
            // Self-closing output is normalized to ` />`.
            close: if el.self_closing {
                " />".to_string()
            } else {
                el.close_text.clone()
            },
            end_tag: el.end_tag.clone(),
            omit,
            line: el.span.line,
            column: el.span.column,
        })
    }

    fn static_attr_plan(
        &self,
        attr: &AttributeRec,
        ctx: &Ctx,
        translate: Option<TranslatePlan>,
    ) -> Result<AttrPlan> {
        let leading = if self.settings.trim_attribute_space {
            " ".to_string()
        } else if attr.leading.is_empty() {
            " ".to_string()
        } else {
            attr.leading.clone()
        };

        let value = if !attr.has_value {
            // A minimized attribute renders as its bare name.
            AttrValuePlan::Static(String::new())
        } else if ctx.interpolation && attr.value.contains('$') {
            // `$$` reduces even when no expression is present.
            AttrValuePlan::Parts(self.lower_parts(&attr.value, attr.span)?)
        } else {
            AttrValuePlan::Static(attr.raw_value.clone())
        };

        Ok(AttrPlan {
            name: attr.raw_name.clone(),
            leading,
            quote: attr.quote.unwrap_or('"'),
            boolean: self.is_boolean(&attr.name.local) && attr.has_value,
            minimized: !attr.has_value,
            value,
            static_fallback: None,
            translate,
        })
    }

    fn is_boolean(&self, name: &str) -> bool {
        self.settings
            .boolean_attributes
            .contains(&name.to_ascii_lowercase())
    }

    /// The literal static-attribute-only tag pair used by the
    /// `tal:on-error` substitute; dynamic attributes are dropped.
    fn static_tag(&self, el: &Element, bound: &BoundStatements) -> Option<StaticTag> {
        let mut open = String::new();
        open.push('<');
        open.push_str(&el.raw_name);
        for (index, attr) in el.attributes.iter().enumerate() {
            if bound.stripped.contains(&index) {
                continue;
            }
            open.push_str(&attr.raw);
        }
        open.push_str(&el.close_text);
        Some(StaticTag {
            open,
            close: el.end_tag.clone(),
        })
    }

    /// Gathers `fill-slot` elements at any depth below a `use-macro`
    /// element. Non-fill content of the caller is discarded; the macro
    /// body replaces it.
    fn collect_fills(
        &mut self,
        nodes: &[Node],
        ctx: &Ctx,
        fills: &mut Vec<(String, Step)>,
    ) -> Result<()> {
        for node in nodes {
            let Node::Element(child) = node else {
                continue;
            };
            let bound = bind(child, self.settings)?;
            let fill_name = bound.statements.iter().find_map(|s| match s {
                Statement::FillSlot { name, .. } => Some(name.clone()),
                _ => None,
            });
            match fill_name {
                Some(name) => {
                    let step = self.compile_element(child, ctx, true)?;
                    fills.push((name, step));
                }
                None => self.collect_fills(&child.children, ctx, fills)?,
            }
        }
        Ok(())
    }
}

/// Slot names defined anywhere inside a step, in encounter order.
pub fn collect_slot_names(step: &Step) -> Vec<String> {
    let mut names = Vec::new();
    walk_slots(step, &mut names);
    names
}

fn walk_slots(step: &Step, names: &mut Vec<String>) {
    match step {
        Step::DefineSlot { name, default_body } => {
            if !names.contains(name) {
                names.push(name.clone());
            }
            walk_slots(default_body, names);
        }
        Step::Sequence(steps) => {
            for s in steps {
                walk_slots(s, names);
            }
        }
        Step::Element { body, .. }
        | Step::Define { body, .. }
        | Step::Condition { body, .. }
        | Step::Repeat { body, .. }
        | Step::Switch { body, .. }
        | Step::Case { body, .. }
        | Step::DefineMacro { body, .. }
        | Step::Translate { body, .. }
        | Step::I18nName { body, .. }
        | Step::OnError { body, .. } => walk_slots(body, names),
        Step::Content { default_body, .. } => walk_slots(default_body, names),
        Step::UseMacro { fills, .. } => {
            for (_, fill) in fills {
                walk_slots(fill, names);
            }
        }
        Step::Text(_) | Step::Interpolation { .. } | Step::CodeBlock { .. } | Step::Nothing => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse;

    fn compile(source: &str) -> Program {
        compile_with(source, Settings::default())
    }

    fn compile_with(source: &str, settings: Settings) -> Program {
        let doc = parse(source).unwrap();
        let registry = ExpressionRegistry::with_defaults(&settings.default_expression);
        compile_document(&doc, &settings, &registry, None).unwrap()
    }

    fn compile_err(source: &str) -> TalError {
        let settings = Settings::default();
        let doc = parse(source).unwrap();
        let registry = ExpressionRegistry::with_defaults("python");
        compile_document(&doc, &settings, &registry, None).unwrap_err()
    }

    #[test]
    fn test_statement_order_is_canonical() {
        // Source order deliberately scrambled: repeat before define,
        // condition after content.
        let program = compile(
            r#"<li tal:repeat="i items" tal:define="items range(3)" tal:content="i" tal:condition="items">x</li>"#,
        );
        let Step::Define { body, .. } = &program.root else {
            panic!("define must be outermost, got {:?}", program.root);
        };
        let Step::Condition { body, .. } = body.as_ref() else {
            panic!("condition next");
        };
        let Step::Repeat { body, .. } = body.as_ref() else {
            panic!("repeat next");
        };
        let Step::Element { body, .. } = body.as_ref() else {
            panic!("element innermost");
        };
        assert!(matches!(body.as_ref(), Step::Content { .. }));
    }

    #[test]
    fn test_content_and_replace_conflict() {
        let err = compile_err(r#"<p tal:content="a" tal:replace="b">x</p>"#);
        assert!(err.to_string().contains("cannot appear"));
    }

    #[test]
    fn test_case_requires_switch() {
        let err = compile_err(r#"<p tal:case="1">x</p>"#);
        assert!(err.to_string().contains("tal:switch"));

        let program = compile(
            r#"<div tal:switch="x"><p tal:case="1">a</p><p tal:case="default">b</p></div>"#,
        );
        let Step::Switch { body, .. } = &program.root else {
            panic!("switch outermost");
        };
        assert!(matches!(body.as_ref(), Step::Element { .. }));
    }

    #[test]
    fn test_fill_slot_outside_use_macro() {
        let err = compile_err(r#"<div metal:fill-slot="s">x</div>"#);
        assert!(err.to_string().contains("use-macro"));
    }

    #[test]
    fn test_macro_definition_and_use() {
        let program = compile(
            r#"<html metal:define-macro="main"><div metal:define-slot="content">default</div></html>"#,
        );
        assert_eq!(program.macro_names(), vec!["main"]);
        assert_eq!(program.macros[0].slots, vec!["content"]);
        assert!(matches!(program.root, Step::DefineMacro { .. }));

        let program = compile(
            r#"<div metal:use-macro="main"><p metal:fill-slot="content">mine</p></div>"#,
        );
        let Step::UseMacro { fills, extend, .. } = &program.root else {
            panic!("use-macro expected");
        };
        assert!(!extend);
        assert_eq!(fills.len(), 1);
        assert_eq!(fills[0].0, "content");
    }

    #[test]
    fn test_interpolation_toggle() {
        let program = compile(r#"<div meta:interpolation="off"><p>${not_lowered}</p></div>"#);
        fn find_text(step: &Step) -> Vec<String> {
            match step {
                Step::Text(t) => vec![t.clone()],
                Step::Sequence(steps) => steps.iter().flat_map(find_text).collect(),
                Step::Element { body, .. } => find_text(body),
                _ => vec![],
            }
        }
        let texts = find_text(&program.root);
        assert!(texts.iter().any(|t| t.contains("${not_lowered}")));
    }

    #[test]
    fn test_attribute_rewrite_case_insensitive() {
        let program =
            compile(r#"<a HREF="/static" tal:attributes="href link">x</a>"#);
        let Step::Element { plan, .. } = &program.root else {
            panic!();
        };
        assert_eq!(plan.attrs.len(), 1);
        // The directive's casing is produced.
        assert_eq!(plan.attrs[0].name, "href");
        assert!(matches!(plan.attrs[0].value, AttrValuePlan::Dynamic(_)));
        assert_eq!(plan.attrs[0].static_fallback.as_deref(), Some("/static"));
    }

    #[test]
    fn test_i18n_context_is_lexical() {
        let program = compile(
            r#"<div i18n:domain="shop"><p i18n:translate="">Buy</p></div>"#,
        );
        fn find_translate(step: &Step) -> Option<TranslatePlan> {
            match step {
                Step::Translate { plan, .. } => Some(plan.clone()),
                Step::Sequence(steps) => steps.iter().find_map(find_translate),
                Step::Element { body, .. } => find_translate(body),
                _ => None,
            }
        }
        let plan = find_translate(&program.root).expect("translate site");
        assert_eq!(plan.domain.as_deref(), Some("shop"));
    }

    #[test]
    fn test_code_block_compiles() {
        let program = compile("<?python x = 1 + 2 ?><p>${x}</p>");
        let Step::Sequence(steps) = &program.root else {
            panic!();
        };
        assert!(matches!(steps[0], Step::CodeBlock { .. }));
    }

    #[test]
    fn test_drop_comment_vanishes_and_verbatim_stays() {
        let program = compile("<!--! gone --><!--? ${kept} -->");
        let Step::Text(text) = &program.root else {
            panic!("expected single text step, got {:?}", program.root);
        };
        assert_eq!(text, "<!-- ${kept} -->");
    }

    #[test]
    fn test_control_element_omits_tags() {
        let program = compile(r#"<tal:block content="x">y</tal:block>"#);
        let Step::Element { plan, .. } = &program.root else {
            panic!();
        };
        assert!(matches!(plan.omit, OmitPlan::Always));
    }
}
