// Copyright 2019-2026 Maravilla Labs, operated by SOLUTAS GmbH, Switzerland
// SPDX-License-Identifier: Apache-2.0
// SPDX-License-Identifier: MIT

use crate::*;
use std::fs;
use tempfile::TempDir;

fn vars(pairs: &[(&str, Value)]) -> ValueMap {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
}

fn render(source: &str, bindings: &[(&str, Value)]) -> String {
    Template::new(source, Settings::default())
        .unwrap()
        .render(vars(bindings))
        .unwrap()
}

mod scenarios {
    use super::*;

    #[test]
    fn test_s1_content_insertion() {
        let out = render(
            r#"<p tal:content="'Hello, ' + name">x</p>"#,
            &[("name", Value::Str("World".into()))],
        );
        assert_eq!(out, "<p>Hello, World</p>");
    }

    #[test]
    fn test_s2_repeat_numbers() {
        let out = render(
            r#"<ul><li tal:repeat="i range(3)" tal:content="repeat.i.number"/></ul>"#,
            &[],
        );
        assert_eq!(out, "<ul><li>1</li><li>2</li><li>3</li></ul>");
    }

    #[test]
    fn test_s3_attribute_none_and_default() {
        let out = render(r#"<a tal:attributes="href None" href="/x">k</a>"#, &[]);
        assert_eq!(out, "<a>k</a>");

        let out = render(r#"<a tal:attributes="href default" href="/x">k</a>"#, &[]);
        assert_eq!(out, r#"<a href="/x">k</a>"#);
    }

    #[test]
    fn test_s4_boolean_attribute() {
        let source = r#"<input type="checkbox" tal:attributes="checked ok"/>"#;
        let out = render(source, &[("ok", Value::Bool(true))]);
        assert_eq!(out, r#"<input type="checkbox" checked="checked" />"#);

        let out = render(source, &[("ok", Value::Bool(false))]);
        assert_eq!(out, r#"<input type="checkbox" />"#);
    }

    #[test]
    fn test_s5_escaping_and_structure() {
        assert_eq!(
            render("<div>${'A & B'}</div>", &[]),
            "<div>A &amp; B</div>"
        );
        assert_eq!(
            render("<div>${structure:'<em>x</em>'}</div>", &[]),
            "<div><em>x</em></div>"
        );
    }

    #[test]
    fn test_s6_macro_slot_wiring() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join("main.pt"),
            concat!(
                r#"<html metal:define-macro="main"><body>"#,
                r#"<div metal:define-slot="content" /></body></html>"#,
            ),
        )
        .unwrap();
        let page = dir.path().join("page.pt");
        fs::write(
            &page,
            concat!(
                r#"<div tal:define="layout load: main.pt" tal:omit-tag="">"#,
                r#"<x metal:use-macro="layout.macros['main']">"#,
                r#"<p metal:fill-slot="content">filled</p></x></div>"#,
            ),
        )
        .unwrap();

        let template = Template::from_file(&page, Settings::default()).unwrap();
        let out = template.render(ValueMap::new()).unwrap();
        assert_eq!(out, "<html><body><p>filled</p></body></html>");
    }
}

mod properties {
    use super::*;

    #[test]
    fn test_statement_order_ignores_source_order() {
        let canonical = r#"<li tal:define="items range(2)" tal:condition="items" tal:repeat="i items" tal:content="i">x</li>"#;
        let scrambled = r#"<li tal:content="i" tal:repeat="i items" tal:condition="items" tal:define="items range(2)">x</li>"#;
        assert_eq!(render(canonical, &[]), render(scrambled, &[]));
        assert_eq!(render(canonical, &[]), "<li>0</li><li>1</li>");
    }

    #[test]
    fn test_repeat_scope_never_leaks() {
        let out = render(
            concat!(
                r#"<div><i tal:repeat="n range(2)" tal:content="n"/>"#,
                r#"<b tal:condition="exists:n">var leaked</b>"#,
                r#"<b tal:condition="exists:repeat.n">entry leaked</b></div>"#,
            ),
            &[],
        );
        assert_eq!(out, "<div><i>0</i><i>1</i></div>");
    }

    #[test]
    fn test_identical_compiles_are_byte_identical() {
        let source = r#"<div tal:repeat="i range(3)"><p tal:content="i" class="n-${i}">x</p></div>"#;
        let a = Template::new(source, Settings::default())
            .unwrap()
            .program()
            .unwrap();
        let b = Template::new(source, Settings::default())
            .unwrap()
            .program()
            .unwrap();
        assert_eq!(
            serde_json::to_vec(a.as_ref()).unwrap(),
            serde_json::to_vec(b.as_ref()).unwrap()
        );
    }

    #[test]
    fn test_pipe_fallback_takes_first_success() {
        let out = render(
            r#"<p tal:content="missing.name | bad[0] | winner | 'never'">x</p>"#,
            &[("winner", Value::Str("ok".into()))],
        );
        assert_eq!(out, "<p>ok</p>");
    }

    #[test]
    fn test_pipe_fallback_does_not_swallow_zero_division() {
        let result = Template::new(r#"<p tal:content="1 // 0 | 'fallback'">x</p>"#, Settings::default())
            .unwrap()
            .render(ValueMap::new());
        match result {
            Err(TalError::RenderError(e)) => {
                assert_eq!(e.original_kind(), ErrorKind::ZeroDivision)
            }
            other => panic!("expected zero-division error, got {:?}", other),
        }
    }

    #[test]
    fn test_html_capable_object_is_not_escaped() {
        #[derive(Debug)]
        struct Widget;
        impl ObjectValue for Widget {
            fn html(&self) -> Option<String> {
                Some("<b>w</b>".to_string())
            }
            fn repr(&self) -> String {
                "widget".to_string()
            }
        }
        let out = render(
            r#"<div tal:content="w">x</div>"#,
            &[("w", Value::Object(std::sync::Arc::new(Widget)))],
        );
        assert_eq!(out, "<div><b>w</b></div>");
    }

    #[test]
    fn test_dollar_dollar_is_literal() {
        assert_eq!(render("<p>$$</p>", &[]), "<p>$</p>");
        assert_eq!(
            render(r#"<a title="$${t}">x</a>"#, &[]),
            r#"<a title="${t}">x</a>"#
        );
    }

    #[test]
    fn test_switch_case_first_match_only() {
        let source = concat!(
            r#"<div tal:switch="n">"#,
            r#"<p tal:case="1">one</p>"#,
            r#"<p tal:case="n">same value</p>"#,
            r#"<p tal:case="default">fallback</p></div>"#,
        );
        assert_eq!(
            render(source, &[("n", Value::Int(1))]),
            "<div><p>one</p></div>"
        );
        assert_eq!(
            render(source, &[("n", Value::Int(5))]),
            "<div><p>same value</p></div>"
        );
    }

    #[test]
    fn test_nested_repeat_shadowing() {
        let out = render(
            concat!(
                r#"<i tal:repeat="x range(2)">"#,
                r#"<b tal:repeat="x range(1)" tal:content="repeat.x.length"/>"#,
                r#"<u tal:content="repeat.x.length"/></i>"#,
            ),
            &[],
        );
        // Inner loop shadows the repeat entry; the outer one returns
        // after it ends.
        assert_eq!(out, "<i><b>1</b><u>2</u></i><i><b>1</b><u>2</u></i>");
    }
}

mod expressions {
    use super::*;

    #[test]
    fn test_string_expression_type() {
        let out = render(
            r#"<p tal:content="string:Hello $name, ${1 + 1} times">x</p>"#,
            &[("name", Value::Str("Ana".into()))],
        );
        assert_eq!(out, "<p>Hello Ana, 2 times</p>");
    }

    #[test]
    fn test_exists_and_not() {
        let out = render(
            r#"<div><p tal:condition="exists:x">yes</p><p tal:condition="not:exists:x">no</p></div>"#,
            &[],
        );
        assert_eq!(out, "<div><p>no</p></div>");
    }

    #[test]
    fn test_entity_escapes_in_expressions() {
        let out = render(r#"<p tal:condition="1 &lt; 2" tal:content="'ok'">x</p>"#, &[]);
        assert_eq!(out, "<p>ok</p>");
    }

    #[test]
    fn test_semicolon_escape_in_statements() {
        let out = render(r#"<p tal:attributes="title 'a;;b'; lang 'en'">x</p>"#, &[]);
        assert_eq!(out, r#"<p title="a;b" lang="en">x</p>"#);
    }

    #[test]
    fn test_tuple_unpacking_in_repeat() {
        let pairs = Value::Seq(vec![
            Value::Seq(vec![Value::Str("a".into()), Value::Int(1)]),
            Value::Seq(vec![Value::Str("b".into()), Value::Int(2)]),
        ]);
        let out = render(
            r#"<i tal:repeat="(k, v) pairs">${k}=${v};</i>"#,
            &[("pairs", pairs)],
        );
        assert_eq!(out, "<i>a=1;</i><i>b=2;</i>");
    }

    #[test]
    fn test_attribute_dict_contribution() {
        let out = render(
            r#"<a tal:attributes="python:{'href': '/x', 'rel': 'next'}">k</a>"#,
            &[],
        );
        assert_eq!(out, r#"<a href="/x" rel="next">k</a>"#);
    }

    #[test]
    fn test_scope_introspection() {
        let out = render(
            r#"<p tal:define="a 1" tal:content="'a' in econtext">x</p>"#,
            &[],
        );
        assert_eq!(out, "<p>True</p>");
    }
}

mod i18n_layer {
    use super::*;

    #[test]
    fn test_attribute_translation() {
        let mut table = TableTranslator::new();
        table.insert("submit-label", "Envoyer");
        let template = Template::new(
            r#"<input type="submit" value="Send" i18n:attributes="value submit-label"/>"#,
            Settings::default(),
        )
        .unwrap();
        let out = template
            .render_with(ValueMap::new(), &table, ValueMap::new())
            .unwrap();
        assert_eq!(out, r#"<input type="submit" value="Envoyer" />"#);
    }

    #[test]
    fn test_domain_inherits_lexically() {
        let mut table = TableTranslator::new();
        table.insert_domain("shop", "Buy", "Acheter");
        let template = Template::new(
            r#"<div i18n:domain="shop"><p i18n:translate="">Buy</p></div>"#,
            Settings::default(),
        )
        .unwrap();
        let out = template
            .render_with(ValueMap::new(), &table, ValueMap::new())
            .unwrap();
        assert_eq!(out, "<div><p>Acheter</p></div>");
    }

    #[test]
    fn test_msgid_normalization() {
        let mut table = TableTranslator::new();
        table.insert("Hello big world", "seen");
        let template = Template::new(
            "<p i18n:translate=\"\">  Hello\n   big \t world  </p>",
            Settings::default(),
        )
        .unwrap();
        let out = template
            .render_with(ValueMap::new(), &table, ValueMap::new())
            .unwrap();
        assert_eq!(out, "<p>seen</p>");
    }

    #[test]
    fn test_implicit_translation() {
        let mut settings = Settings::default();
        settings.implicit_i18n_translate = true;
        let mut table = TableTranslator::new();
        table.insert("Welcome", "Bienvenue");
        let template = Template::new("<p>Welcome</p>", settings).unwrap();
        let out = template
            .render_with(ValueMap::new(), &table, ValueMap::new())
            .unwrap();
        assert_eq!(out, "<p>Bienvenue</p>");
    }
}

mod options {
    use super::*;

    #[test]
    fn test_trim_attribute_space() {
        let mut settings = Settings::default();
        settings.trim_attribute_space = true;
        let out = Template::new("<p   class=\"a\"    id=\"b\">x</p>", settings)
            .unwrap()
            .render(ValueMap::new())
            .unwrap();
        assert_eq!(out, r#"<p class="a" id="b">x</p>"#);
    }

    #[test]
    fn test_comment_interpolation_toggle() {
        let source = "<!-- v=${1 + 1} -->";
        assert_eq!(render(source, &[]), "<!-- v=2 -->");

        let mut settings = Settings::default();
        settings.enable_comment_interpolation = false;
        let out = Template::new(source, settings)
            .unwrap()
            .render(ValueMap::new())
            .unwrap();
        assert_eq!(out, source);
    }

    #[test]
    fn test_strict_mode_rejects_unknown_control_attribute() {
        let mut settings = Settings::default();
        settings.strict = true;
        let result = Template::new(r#"<p tal:bogus="1">x</p>"#, settings)
            .unwrap()
            .render(ValueMap::new());
        assert!(matches!(result, Err(TalError::LanguageError { .. })));
    }

    #[test]
    fn test_data_attribute_mode() {
        let mut settings = Settings::default();
        settings.enable_data_attributes = true;
        let out = Template::new(r#"<p data-tal-content="'hi'">x</p>"#, settings)
            .unwrap()
            .render(ValueMap::new())
            .unwrap();
        assert_eq!(out, "<p>hi</p>");
    }

    #[test]
    fn test_extra_builtins() {
        let mut settings = Settings::default();
        settings
            .extra_builtins
            .push(("site".to_string(), Value::Str("tael".into())));
        let out = Template::new(r#"<p tal:content="site">x</p>"#, settings)
            .unwrap()
            .render(ValueMap::new())
            .unwrap();
        assert_eq!(out, "<p>tael</p>");
    }

    #[test]
    fn test_kwargs_do_not_persist_into_macros() {
        // Keyword arguments shadow builtins for the render they were
        // passed to, but a macro rendered on its own starts clean.
        let template = Template::new(
            r#"<p metal:define-macro="m" tal:content="len">x</p>"#,
            Settings::default(),
        )
        .unwrap();
        let mut kwargs = ValueMap::new();
        kwargs.insert_str("len", Value::Int(3));
        let out = template
            .render_with(ValueMap::new(), &NullTranslator, kwargs)
            .unwrap();
        assert_eq!(out, "<p>3</p>");

        let macros = template.macros().unwrap();
        let out = macros.render("m", ValueMap::new()).unwrap();
        assert_eq!(out, "<p>&lt;builtin len&gt;</p>");
    }
}

mod error_reporting {
    use super::*;

    #[test]
    fn test_render_error_location_and_snapshot() {
        let mut settings = Settings::default();
        settings.debug = true;
        let template = Template::new(
            "<div>\n  <p tal:content=\"count + missing\">x</p>\n</div>",
            settings,
        );
        let err = template.unwrap().render(vars(&[("count", Value::Int(2))]));
        let Err(TalError::RenderError(e)) = err else {
            panic!("expected render error");
        };
        assert_eq!(e.original_kind(), ErrorKind::Name);
        assert_eq!(e.expression, "count + missing");
        assert_eq!(e.line, 2);
        assert!(e.variables.iter().any(|(n, v)| n == "count" && v == "2"));
        // Debug mode keeps the source, so the report carries a snippet.
        assert!(e.source_context.is_some());
    }

    #[test]
    fn test_on_error_binds_error_variable() {
        let out = render(
            r#"<p tal:on-error="string:${error.type}" tal:content="nope.nope">x</p>"#,
            &[],
        );
        assert_eq!(out, "<p>NameError</p>");
    }

    #[test]
    fn test_on_error_keeps_static_attributes() {
        let out = render(
            r#"<p class="stable" tal:attributes="id broken.attr" tal:on-error="'saved'" tal:content="'x'">x</p>"#,
            &[],
        );
        // Static attributes survive; the dynamic one is dropped.
        assert_eq!(out, r#"<p class="stable">saved</p>"#);
    }
}
