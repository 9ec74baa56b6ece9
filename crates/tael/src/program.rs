// Copyright 2019-2026 Maravilla Labs, operated by SOLUTAS GmbH, Switzerland
// SPDX-License-Identifier: Apache-2.0
// SPDX-License-Identifier: MIT

//! The compiled program.
//!
//! The code generator lowers an annotated element tree into this
//! instruction tree; the renderer interprets it. The whole structure is
//! serde-serializable, which is what the disk cache persists: compiling
//! the same source with the same settings twice yields byte-identical
//! serialized artifacts.
//!
//! Each expression-bearing instruction carries the literal expression
//! source and its template location, so render-time failures can cite
//! template text without keeping the template itself in memory.

use crate::pyexpr::Assignment;
use crate::tales::Expr;
use serde::{Deserialize, Serialize};

/// A compiled expression together with its source slice and location.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExprInfo {
    /// The compiled expression.
    pub expr: Expr,
    /// The literal expression text from the template.
    pub source: String,
    /// 1-indexed line of the expression.
    pub line: usize,
    /// 1-indexed column of the expression.
    pub column: usize,
}

/// One part of an interpolated text or attribute value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TplPart {
    /// Literal output.
    Text(String),
    /// An evaluated insertion.
    Expr(ExprInfo),
}

/// Where a `tal:define` binding lands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DefineScope {
    /// Innermost frame; gone when the element closes.
    Local,
    /// The global layer; survives the element.
    Global,
}

/// One binding of a `tal:define` statement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DefineBinding {
    /// Local or global.
    pub scope: DefineScope,
    /// Target names; more than one means tuple unpacking.
    pub targets: Vec<String>,
    /// The defining expression.
    pub expr: ExprInfo,
}

/// Whether and when a start/end tag pair is omitted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum OmitPlan {
    /// Tags always render.
    Never,
    /// Tags never render (empty `tal:omit-tag`).
    Always,
    /// Tags render unless the expression is truthy.
    Expr(ExprInfo),
}

/// Compile-resolved translation context for one site.
///
/// `i18n:domain`, `i18n:context`, `i18n:source` and `i18n:target` are
/// inherited lexically, so the compiler resolves them per site; the
/// renderer never tracks them dynamically.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TranslatePlan {
    /// Explicit message id, if the statement carried one.
    pub msgid: Option<String>,
    /// Translation domain.
    pub domain: Option<String>,
    /// Message context.
    pub context: Option<String>,
    /// Source language.
    pub source_lang: Option<String>,
    /// Target language.
    pub target_lang: Option<String>,
    /// `i18n:data`: the expression whose value becomes the message.
    pub data: Option<ExprInfo>,
}

/// How one attribute renders.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AttrValuePlan {
    /// Static text, emitted exactly as written in the template.
    Static(String),
    /// A `tal:attributes` expression.
    Dynamic(ExprInfo),
    /// A static value containing `${...}` interpolation.
    Parts(Vec<TplPart>),
}

/// The render plan for one attribute.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttrPlan {
    /// The produced attribute name (the directive's casing wins).
    pub name: String,
    /// Whitespace emitted before the name.
    pub leading: String,
    /// Quote character for the value.
    pub quote: char,
    /// The value plan.
    pub value: AttrValuePlan,
    /// A minimized attribute (`checked` with no value): the bare name
    /// is emitted.
    pub minimized: bool,
    /// Whether the name is in the boolean-attribute set.
    pub boolean: bool,
    /// The static value `default` reverts to (None drops the attribute).
    pub static_fallback: Option<String>,
    /// Translation of the value, when `i18n:attributes` names it.
    pub translate: Option<TranslatePlan>,
}

/// The render plan for an element's tags.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ElementPlan {
    /// The tag name exactly as written.
    pub tag: String,
    /// Attribute plans in output order.
    pub attrs: Vec<AttrPlan>,
    /// Whole-mapping `tal:attributes` contributions, evaluated after
    /// the named attributes.
    pub splices: Vec<ExprInfo>,
    /// `>` or ` />` exactly as written.
    pub close: String,
    /// The literal end tag, if the element has one.
    pub end_tag: Option<String>,
    /// Tag omission.
    pub omit: OmitPlan,
    /// 1-indexed line of the element.
    pub line: usize,
    /// 1-indexed column of the element.
    pub column: usize,
}

/// Literal start/end tag text carrying only static attributes, used by
/// the `tal:on-error` fallback.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StaticTag {
    /// The literal start tag.
    pub open: String,
    /// The literal end tag, if any.
    pub close: Option<String>,
}

/// One instruction of the compiled program.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Step {
    /// Instructions in order.
    Sequence(Vec<Step>),
    /// Literal output.
    Text(String),
    /// Lowered interpolation: parts concatenated into the output,
    /// expression results escaped unless marked as structure.
    Interpolation {
        /// The parts.
        parts: Vec<TplPart>,
    },
    /// An element: attribute writer, omission, body, end tag.
    Element {
        /// Tag plan.
        plan: ElementPlan,
        /// Body instructions.
        body: Box<Step>,
    },
    /// `tal:define`: bindings visible while the body runs.
    Define {
        /// Bindings in source order.
        bindings: Vec<DefineBinding>,
        /// The governed body.
        body: Box<Step>,
    },
    /// `tal:condition`.
    Condition {
        /// The condition expression.
        expr: ExprInfo,
        /// Rendered when truthy (or `default`).
        body: Box<Step>,
    },
    /// `tal:repeat`.
    Repeat {
        /// Loop variable names; more than one unpacks by position.
        targets: Vec<String>,
        /// The iterable expression.
        expr: ExprInfo,
        /// The loop body.
        body: Box<Step>,
    },
    /// `tal:switch`: evaluates the subject for descendant cases.
    Switch {
        /// The subject expression.
        expr: ExprInfo,
        /// The governed body.
        body: Box<Step>,
    },
    /// `tal:case`: renders when its value equals the innermost switch
    /// subject and no earlier case on that switch matched.
    Case {
        /// The case expression.
        expr: ExprInfo,
        /// The case body.
        body: Box<Step>,
    },
    /// `tal:content` / `tal:replace` body insertion.
    Content {
        /// The content expression.
        expr: ExprInfo,
        /// Insert without escaping.
        structure: bool,
        /// The original body, rendered when the value is `default`.
        default_body: Box<Step>,
    },
    /// `tal:on-error` protection around an element.
    OnError {
        /// The protected instructions.
        body: Box<Step>,
        /// The error expression.
        handler: ExprInfo,
        /// Insert the handler result without escaping.
        structure: bool,
        /// Static-attribute-only tag pair for the substitute output.
        static_tag: Option<StaticTag>,
    },
    /// `metal:define-macro`: the body also renders in place.
    DefineMacro {
        /// Macro name.
        name: String,
        /// Macro body.
        body: Box<Step>,
    },
    /// `metal:use-macro` / `metal:extend-macro` invocation.
    UseMacro {
        /// Expression yielding the macro.
        expr: ExprInfo,
        /// Slot fills collected from `metal:fill-slot` descendants.
        fills: Vec<(String, Step)>,
        /// True for `extend-macro` (outer fillers stay visible).
        extend: bool,
    },
    /// `metal:define-slot`: a named hole with default content.
    DefineSlot {
        /// Slot name.
        name: String,
        /// Rendered when no filler applies.
        default_body: Box<Step>,
    },
    /// `i18n:translate` capture.
    Translate {
        /// Compile-resolved translation context.
        plan: TranslatePlan,
        /// The captured body.
        body: Box<Step>,
    },
    /// `i18n:name`: a named subtemplate inside a translation capture.
    I18nName {
        /// Substitution name.
        name: String,
        /// The capture body.
        body: Box<Step>,
    },
    /// `<?python ... ?>` assignments in the enclosing scope.
    CodeBlock {
        /// Assignments in order.
        assignments: Vec<Assignment>,
    },
    /// Nothing at all.
    Nothing,
}

impl Step {
    /// Wraps steps, avoiding a needless `Sequence` for zero or one.
    pub fn sequence(mut steps: Vec<Step>) -> Step {
        steps.retain(|s| !matches!(s, Step::Nothing));
        match steps.len() {
            0 => Step::Nothing,
            1 => steps.into_iter().next().unwrap(),
            _ => Step::Sequence(steps),
        }
    }
}

/// A named subtree reusable across templates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MacroDef {
    /// The macro name.
    pub name: String,
    /// The macro body.
    pub body: Step,
    /// Slot names defined inside the body, in source order.
    pub slots: Vec<String>,
}

/// A compiled template program.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Program {
    /// The top-level instructions.
    pub root: Step,
    /// Macros defined by the template.
    pub macros: Vec<MacroDef>,
    /// The template filename, for diagnostics.
    pub filename: Option<String>,
}

impl Program {
    /// Finds a macro by name.
    pub fn macro_named(&self, name: &str) -> Option<&MacroDef> {
        self.macros.iter().find(|m| m.name == name)
    }

    /// Macro names in definition order.
    pub fn macro_names(&self) -> Vec<&str> {
        self.macros.iter().map(|m| m.name.as_str()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pyexpr::PyExpr;

    fn info(src: &str) -> ExprInfo {
        ExprInfo {
            expr: Expr::Py(PyExpr::Name(src.to_string())),
            source: src.to_string(),
            line: 1,
            column: 1,
        }
    }

    #[test]
    fn test_sequence_flattening() {
        assert_eq!(Step::sequence(vec![]), Step::Nothing);
        assert_eq!(
            Step::sequence(vec![Step::Text("a".into()), Step::Nothing]),
            Step::Text("a".into())
        );
        assert!(matches!(
            Step::sequence(vec![Step::Text("a".into()), Step::Text("b".into())]),
            Step::Sequence(_)
        ));
    }

    #[test]
    fn test_program_serde_roundtrip_is_stable() {
        let program = Program {
            root: Step::Sequence(vec![
                Step::Text("<p>".into()),
                Step::Content {
                    expr: info("name"),
                    structure: false,
                    default_body: Box::new(Step::Text("x".into())),
                },
                Step::Text("</p>".into()),
            ]),
            macros: vec![MacroDef {
                name: "main".into(),
                body: Step::Nothing,
                slots: vec!["content".into()],
            }],
            filename: Some("page.pt".into()),
        };

        let first = serde_json::to_string(&program).unwrap();
        let back: Program = serde_json::from_str(&first).unwrap();
        let second = serde_json::to_string(&back).unwrap();
        assert_eq!(first, second);
        assert_eq!(back, program);
        assert_eq!(back.macro_named("main").unwrap().slots, vec!["content"]);
    }
}
