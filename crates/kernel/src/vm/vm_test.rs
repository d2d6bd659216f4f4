// Copyright (C) 2025 Ryan Daum <ryan.daum@gmail.com> This program is free
// software: you can redistribute it and/or modify it under the terms of the GNU
// General Public License as published by the Free Software Foundation, version
// 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//

#[cfg(test)]
mod tests {
    use crate::config::RenderConfig;
    use crate::dom::{Bounds, DomChanges, NodeId, SimpleDom, TreeConstruction};
    use crate::environment::{DefaultHost, Environment, Registry};
    use crate::testing::{HarnessError, Rendered, TestHarness};
    use crate::vm::{
        BasicComponentManager, Component, ComponentManager, DynamicScope, EvaluatedArgs,
        Modifier, ModifierManager, NamedArgsReference, render as render_program,
    };
    use pretty_assertions::assert_eq;
    use serde_json::{Value, json};
    use std::cell::{Cell, RefCell};
    use std::rc::Rc;
    use std::sync::Arc;
    use trellis_common::model::RenderError;
    use trellis_common::reference::{ReferenceRc, UpdatableReference};
    use trellis_compiler::{SerializedTemplate, compile_template};
    use trellis_var::{Var, v_bool, v_empty_list, v_int, v_list, v_map, v_str};

    type Log = Rc<RefCell<Vec<String>>>;

    fn template(value: Value) -> Arc<SerializedTemplate> {
        Arc::new(SerializedTemplate::from_value(value).unwrap())
    }

    fn render(value: Value, context: Var) -> Rendered {
        TestHarness::new().render(value, context).unwrap()
    }

    fn name_context(name: &str) -> Var {
        v_map(&[("name", v_str(name))])
    }

    fn paragraph_template() -> Value {
        json!({
            "statements": [
                ["open-element", "p", []],
                ["flush-element"],
                ["append", ["unknown", ["name"]], false],
                ["close-element"]
            ]
        })
    }

    #[test]
    fn test_text_update_touches_only_the_text_node() {
        let mut r = render(paragraph_template(), name_context("Tom"));
        assert_eq!(r.html(), "<p>Tom</p>");
        let p = r.dom.find_all(r.root, "p")[0];
        let text = r.dom.children(p)[0];

        assert_eq!(r.rerender_with(name_context("Jerry")).unwrap(), 1);
        assert_eq!(r.html(), "<p>Jerry</p>");
        assert_eq!(r.dom.find_all(r.root, "p"), vec![p]);
        assert_eq!(r.dom.children(p), vec![text]);
        assert_eq!(r.result.opcodes(), vec!["UpdateText"]);
    }

    #[test]
    fn test_traced_render_matches_untraced() {
        let config = RenderConfig {
            trace_opcodes: true,
            ..Default::default()
        };
        let mut r = TestHarness::with_config(config)
            .render(paragraph_template(), name_context("Tom"))
            .unwrap();
        assert_eq!(r.html(), "<p>Tom</p>");
        assert!(r.result.stats().opcodes > 0);
        assert_eq!(r.rerender_with(name_context("Jerry")).unwrap(), 1);
    }

    #[test]
    fn test_unchanged_rerender_mutates_nothing() {
        let mut r = render(paragraph_template(), name_context("Tom"));
        assert_eq!(r.rerender_with(name_context("Tom")).unwrap(), 0);
        r.dom.reset_mutations();
        r.rerender().unwrap();
        assert_eq!(r.dom.mutations(), 0);
        assert_eq!(r.html(), "<p>Tom</p>");
    }

    fn conditional_template() -> Value {
        json!({
            "statements": [
                ["open-element", "p", []], ["flush-element"], ["text", "a"], ["close-element"],
                ["block", ["if"], [["unknown", ["flag"]]], null, 0, null],
                ["open-element", "p", []], ["flush-element"], ["text", "b"], ["close-element"]
            ],
            "blocks": [{"statements": [
                ["open-element", "span", []],
                ["flush-element"],
                ["text", "yes"],
                ["close-element"]
            ]}]
        })
    }

    #[test]
    fn test_conditional_inserts_without_touching_siblings() {
        let mut r = render(conditional_template(), v_map(&[("flag", v_bool(false))]));
        assert_eq!(r.html(), "<p>a</p><!----><p>b</p>");
        assert!(r.dom.find_all(r.root, "span").is_empty());
        assert_eq!(r.result.opcodes(), vec!["Try", "  Assert"]);
        let paragraphs = r.dom.find_all(r.root, "p");

        r.update(v_map(&[("flag", v_bool(true))]));
        r.rerender().unwrap();
        assert_eq!(r.html(), "<p>a</p><span>yes</span><p>b</p>");
        assert_eq!(r.dom.find_all(r.root, "p"), paragraphs);
        let span = r.dom.find_all(r.root, "span")[0];
        assert_eq!(r.dom.parent(span), Some(r.root));

        r.update(v_map(&[("flag", v_bool(false))]));
        r.rerender().unwrap();
        assert_eq!(r.html(), "<p>a</p><!----><p>b</p>");
        assert_eq!(r.dom.find_all(r.root, "p"), paragraphs);
    }

    #[test]
    fn test_conditional_else_branch() {
        let mut r = render(
            json!({
                "statements": [["block", ["if"], [["unknown", ["n"]]], null, 0, 1]],
                "blocks": [
                    {"statements": [["text", "some"]]},
                    {"statements": [["text", "none"]]}
                ]
            }),
            v_map(&[("n", v_int(0))]),
        );
        assert_eq!(r.html(), "none");
        r.update(v_map(&[("n", v_int(3))]));
        r.rerender().unwrap();
        assert_eq!(r.html(), "some");
        // Truthiness did not change, so neither does the output.
        assert_eq!(r.rerender_with(v_map(&[("n", v_int(4))])).unwrap(), 0);
    }

    fn item(id: i64, name: &str) -> Var {
        v_map(&[("id", v_int(id)), ("name", v_str(name))])
    }

    fn items(list: &[Var]) -> Var {
        v_map(&[("items", v_list(list))])
    }

    fn list_template(inverse: bool) -> Value {
        let mut blocks = vec![json!({
            "statements": [
                ["open-element", "li", []],
                ["flush-element"],
                ["append", ["get", ["item", "name"]], false],
                ["close-element"]
            ],
            "locals": ["item"]
        })];
        if inverse {
            blocks.push(json!({"statements": [["text", "none"]]}));
        }
        json!({
            "statements": [
                ["open-element", "ul", []],
                ["flush-element"],
                ["block", ["each"], [["unknown", ["items"]]], [["key"], ["id"]], 0,
                    if inverse { json!(1) } else { Value::Null }],
                ["close-element"]
            ],
            "blocks": blocks
        })
    }

    fn lis(r: &Rendered) -> Vec<NodeId> {
        r.dom.find_all(r.root, "li")
    }

    #[test]
    fn test_keyed_reverse_moves_nodes() {
        let mut r = render(list_template(false), items(&[item(1, "A"), item(2, "B")]));
        assert_eq!(r.html(), "<ul><li>A</li><li>B</li></ul>");
        let before = lis(&r);

        r.update(items(&[item(2, "B"), item(1, "A")]));
        r.rerender().unwrap();
        assert_eq!(r.html(), "<ul><li>B</li><li>A</li></ul>");
        assert_eq!(lis(&r), vec![before[1], before[0]]);
    }

    #[test]
    fn test_keyed_item_edit_updates_in_place() {
        let mut r = render(list_template(false), items(&[item(1, "A"), item(2, "B")]));
        let before = lis(&r);
        let mutations = r
            .rerender_with(items(&[item(1, "A"), item(2, "Bee")]))
            .unwrap();
        assert_eq!(mutations, 1);
        assert_eq!(r.html(), "<ul><li>A</li><li>Bee</li></ul>");
        assert_eq!(lis(&r), before);
    }

    #[test]
    fn test_keyed_insert_and_delete() {
        let mut r = render(
            list_template(false),
            items(&[item(1, "A"), item(2, "B"), item(3, "C")]),
        );
        let before = lis(&r);

        r.update(items(&[item(4, "D"), item(1, "A"), item(3, "C")]));
        r.rerender().unwrap();
        assert_eq!(r.html(), "<ul><li>D</li><li>A</li><li>C</li></ul>");
        let after = lis(&r);
        assert!(!before.contains(&after[0]));
        assert_eq!(&after[1..], &[before[0], before[2]]);
        assert_eq!(
            r.result.opcodes(),
            vec![
                "Try",
                "  Assert",
                "  List(3)",
                "    UpdateText",
                "    UpdateText",
                "    UpdateText"
            ]
        );
    }

    #[test]
    fn test_each_inverse_and_emptying() {
        let mut r = render(list_template(true), items(&[]));
        assert_eq!(r.html(), "<ul>none</ul>");

        r.update(items(&[item(1, "A")]));
        r.rerender().unwrap();
        assert_eq!(r.html(), "<ul><li>A</li></ul>");

        r.update(items(&[item(1, "A"), item(2, "B")]));
        r.rerender().unwrap();
        assert_eq!(r.html(), "<ul><li>A</li><li>B</li></ul>");

        r.update(items(&[]));
        r.rerender().unwrap();
        assert_eq!(r.html(), "<ul>none</ul>");
        assert_eq!(r.result.stats().frame_pushes, r.result.stats().frame_pops);
    }

    #[test]
    fn test_each_over_missing_list_renders_nothing() {
        let r = render(list_template(false), v_map(&[]));
        assert_eq!(r.html(), "<ul><!----></ul>");
        let r = render(list_template(false), v_map(&[("items", v_empty_list())]));
        assert_eq!(r.html(), "<ul><!----></ul>");
    }

    #[test]
    fn test_frame_balance_across_renders() {
        let mut r = render(list_template(false), items(&[item(1, "A"), item(2, "B")]));
        r.update(items(&[item(3, "C"), item(2, "B")]));
        r.rerender().unwrap();
        let stats = r.result.stats();
        assert!(stats.frame_pushes > 0);
        assert!(stats.opcodes > 0);
        assert_eq!(stats.frame_pushes, stats.frame_pops);
    }

    #[test]
    fn test_dynamic_attributes() {
        let mut r = render(
            json!({
                "statements": [
                    ["open-element", "a", []],
                    ["static-attr", "class", "link", null],
                    ["dynamic-attr", "href", ["unknown", ["url"]], null],
                    ["dynamic-attr", "hidden", ["unknown", ["hide"]], null],
                    ["flush-element"],
                    ["close-element"]
                ]
            }),
            v_map(&[("url", v_str("/a")), ("hide", v_bool(false))]),
        );
        assert_eq!(r.html(), r#"<a class="link" href="/a"></a>"#);
        let a = r.dom.find_all(r.root, "a")[0];

        r.update(v_map(&[("url", v_str("/b")), ("hide", v_bool(true))]));
        r.rerender().unwrap();
        assert_eq!(r.html(), r#"<a class="link" href="/b" hidden=""></a>"#);
        assert_eq!(r.dom.find_all(r.root, "a"), vec![a]);
    }

    #[test]
    fn test_trusted_and_escaped_content() {
        let mut r = render(
            json!({
                "statements": [
                    ["append", ["unknown", ["html"]], true],
                    ["append", ["unknown", ["html"]], false]
                ]
            }),
            v_map(&[("html", v_str("<b>x</b>"))]),
        );
        assert_eq!(r.html(), "<b>x</b>&lt;b&gt;x&lt;/b&gt;");
        r.update(v_map(&[("html", v_str("<i>y</i>"))]));
        r.rerender().unwrap();
        assert_eq!(r.html(), "<i>y</i>&lt;i&gt;y&lt;/i&gt;");
    }

    #[test]
    fn test_concat_and_literals() {
        let r = render(
            json!({
                "statements": [
                    ["append", ["concat", ["n=", ["unknown", ["n"]], "!"]], false],
                    ["append", 7, false],
                    ["append", null, false]
                ]
            }),
            v_map(&[("n", v_int(2))]),
        );
        assert_eq!(r.html(), "n=2!7");
    }

    #[test]
    fn test_helpers() {
        let mut harness = TestHarness::new();
        harness.registry_mut().register_helper("shout", |args: &EvaluatedArgs| {
            let value = args.positional_values()?;
            Ok(v_str(&value[0].to_content_string().to_uppercase()))
        });
        let mut r = harness
            .render(
                json!({"statements": [
                    ["append", ["helper", ["shout"], [["unknown", ["name"]]], null], false]
                ]}),
                name_context("tom"),
            )
            .unwrap();
        assert_eq!(r.html(), "TOM");
        r.update(name_context("jerry"));
        r.rerender().unwrap();
        assert_eq!(r.html(), "JERRY");
    }

    #[test]
    fn test_failed_initial_render_leaves_no_nodes() {
        let mut harness = TestHarness::new();
        harness.registry_mut().register_helper("boom", |_: &EvaluatedArgs| {
            Err(RenderError::HelperFailed {
                name: "boom".into(),
                message: "always".into(),
            })
        });
        let dom = harness.dom().clone();
        let result = harness.render(
            json!({"statements": [
                ["open-element", "p", []],
                ["flush-element"],
                ["text", "partial output"],
                ["append", ["helper", ["boom"], [], null], false],
                ["close-element"]
            ]}),
            v_map(&[]),
        );
        assert!(matches!(
            result,
            Err(HarnessError::Render(RenderError::HelperFailed { .. }))
        ));
        let div = dom.children(dom.document())[0];
        assert!(dom.children(div).is_empty());
    }

    /// Renders each item's name through a helper that fails on "B" while `failures` lasts.
    fn picky_harness(config: RenderConfig, failures: Rc<Cell<usize>>) -> TestHarness {
        let mut harness = TestHarness::with_config(config);
        harness
            .registry_mut()
            .register_helper("picky", move |args: &EvaluatedArgs| {
                let name = args.positional_values()?[0].clone();
                if name.to_content_string() == "B" && failures.get() > 0 {
                    failures.set(failures.get() - 1);
                    return Err(RenderError::HelperFailed {
                        name: "picky".into(),
                        message: "B".into(),
                    });
                }
                Ok(name)
            });
        harness
    }

    fn picky_list_template() -> Value {
        json!({
            "statements": [
                ["block", ["each"], [["unknown", ["items"]]], [["key"], ["id"]], 0, null]
            ],
            "blocks": [{
                "statements": [
                    ["append", ["helper", ["picky"], [["get", ["item", "name"]]], null], false]
                ],
                "locals": ["item"]
            }]
        })
    }

    #[test]
    fn test_failed_initial_render_inside_list_leaves_no_nodes() {
        let harness = picky_harness(RenderConfig::default(), Rc::new(Cell::new(usize::MAX)));
        let dom = harness.dom().clone();
        let result = harness.render(
            picky_list_template(),
            items(&[item(1, "A"), item(2, "B")]),
        );
        assert!(matches!(
            result,
            Err(HarnessError::Render(RenderError::HelperFailed { .. }))
        ));
        let div = dom.children(dom.document())[0];
        assert!(dom.children(div).is_empty());
    }

    #[test]
    fn test_failed_list_rerender_keeps_committed_output() {
        let failures = Rc::new(Cell::new(0));
        let mut r = picky_harness(RenderConfig::default(), failures.clone())
            .render(picky_list_template(), items(&[item(1, "A")]))
            .unwrap();
        assert_eq!(r.html(), "A");

        // Fails once while syncing, once more while the region renders again from scratch.
        failures.set(2);
        r.update(items(&[item(1, "A"), item(2, "B")]));
        assert!(matches!(
            r.rerender(),
            Err(RenderError::HelperFailed { .. })
        ));
        assert_eq!(failures.get(), 0);
        assert_eq!(r.html(), "A");

        r.rerender().unwrap();
        assert_eq!(r.html(), "AB");
    }

    #[test]
    fn test_list_item_that_failed_to_insert_appears_later() {
        let config = RenderConfig {
            recover_from_exceptions: false,
            ..Default::default()
        };
        let failures = Rc::new(Cell::new(0));
        let mut r = picky_harness(config, failures.clone())
            .render(picky_list_template(), items(&[item(1, "A")]))
            .unwrap();

        failures.set(1);
        r.update(items(&[item(1, "A"), item(2, "B")]));
        assert!(matches!(
            r.rerender(),
            Err(RenderError::HelperFailed { .. })
        ));
        assert_eq!(r.html(), "A");

        r.rerender().unwrap();
        assert_eq!(r.html(), "AB");
        r.update(items(&[item(1, "A"), item(2, "B2")]));
        r.rerender().unwrap();
        assert_eq!(r.html(), "AB2");
    }

    fn flaky_harness(config: RenderConfig, armed: Rc<Cell<bool>>) -> TestHarness {
        let mut harness = TestHarness::with_config(config);
        harness
            .registry_mut()
            .register_helper("flaky", move |args: &EvaluatedArgs| {
                if armed.replace(false) {
                    return Err(RenderError::HelperFailed {
                        name: "flaky".into(),
                        message: "armed".into(),
                    });
                }
                Ok(args.positional_values()?[0].clone())
            });
        harness
    }

    fn flaky_template() -> Value {
        json!({
            "statements": [["block", ["if"], [["unknown", ["show"]]], null, 0, null]],
            "blocks": [{"statements": [
                ["append", ["helper", ["flaky"], [["unknown", ["name"]]], null], false]
            ]}]
        })
    }

    fn flaky_context(name: &str) -> Var {
        v_map(&[("show", v_bool(true)), ("name", v_str(name))])
    }

    #[test]
    fn test_region_recovers_by_rerendering() {
        let armed = Rc::new(Cell::new(false));
        let mut r = flaky_harness(RenderConfig::default(), armed.clone())
            .render(flaky_template(), flaky_context("Tom"))
            .unwrap();
        armed.set(true);
        r.update(flaky_context("Jerry"));
        r.rerender().unwrap();
        assert_eq!(r.html(), "Jerry");
        assert!(!armed.get());
    }

    #[test]
    fn test_failed_update_keeps_output_without_recovery() {
        let config = RenderConfig {
            recover_from_exceptions: false,
            ..Default::default()
        };
        let armed = Rc::new(Cell::new(false));
        let mut r = flaky_harness(config, armed.clone())
            .render(flaky_template(), flaky_context("Tom"))
            .unwrap();
        armed.set(true);
        r.update(flaky_context("Jerry"));
        assert!(matches!(
            r.rerender(),
            Err(RenderError::HelperFailed { .. })
        ));
        assert_eq!(r.html(), "Tom");
        assert!(!r.env.in_transaction());

        // The failed value was never recorded as rendered, so the next pass picks it up.
        r.rerender().unwrap();
        assert_eq!(r.html(), "Jerry");
    }

    #[test]
    fn test_rerender_inside_open_transaction_is_refused() {
        let mut r = render(paragraph_template(), name_context("Tom"));
        r.env.begin().unwrap();
        assert_eq!(r.rerender(), Err(RenderError::TransactionInProgress));
        r.env.rollback();
        r.rerender().unwrap();
    }

    #[test]
    fn test_dynamic_variables() {
        let mut r = render(
            json!({
                "statements": [[
                    "block", ["-with-dynamic-vars"], [],
                    [["color"], [["unknown", ["c"]]]], 0, null
                ]],
                "blocks": [{"statements": [
                    ["append", ["helper", ["-get-dynamic-var"], ["color"], null], false]
                ]}]
            }),
            v_map(&[("c", v_str("red"))]),
        );
        assert_eq!(r.html(), "red");
        r.update(v_map(&[("c", v_str("blue"))]));
        r.rerender().unwrap();
        assert_eq!(r.html(), "blue");
    }

    #[test]
    fn test_with_binds_block_param() {
        let r = render(
            json!({
                "statements": [["block", ["with"], [["unknown", ["user"]]], null, 0, null]],
                "blocks": [{
                    "statements": [["append", ["get", ["u", "name"]], false]],
                    "locals": ["u"]
                }]
            }),
            v_map(&[("user", name_context("Tom"))]),
        );
        assert_eq!(r.html(), "Tom");
    }

    #[test]
    fn test_nested_block_params_shadow_and_restore() {
        let mut r = render(
            json!({
                "statements": [["block", ["with"], [["unknown", ["user"]]], null, 0, null]],
                "blocks": [
                    {
                        "statements": [
                            ["append", ["get", ["u", "name"]], false],
                            ["block", ["with"], [["unknown", ["other"]]], null, 1, null],
                            ["append", ["get", ["u", "name"]], false]
                        ],
                        "locals": ["u"]
                    },
                    {
                        "statements": [["append", ["get", ["u", "name"]], false]],
                        "locals": ["u"]
                    }
                ]
            }),
            v_map(&[("user", name_context("Tom")), ("other", name_context("Jerry"))]),
        );
        assert_eq!(r.html(), "TomJerryTom");
        let scopes = r.result.live_scopes();

        r.update(v_map(&[("user", name_context("Ann")), ("other", name_context("Bob"))]));
        r.rerender().unwrap();
        assert_eq!(r.html(), "AnnBobAnn");
        assert_eq!(r.result.live_scopes(), scopes);
    }

    fn partial_harness() -> TestHarness {
        let mut harness = TestHarness::new();
        let registry = harness.registry_mut();
        registry.register_partial("a", template(json!({"statements": [["text", "A"]]})));
        registry.register_partial(
            "b",
            template(json!({"statements": [["append", ["unknown", ["name"]], false]]})),
        );
        harness
    }

    #[test]
    fn test_static_partial() {
        let r = partial_harness()
            .render(
                json!({"statements": [
                    ["append", ["helper", ["partial"], ["b"], null], false],
                    ["append", ["helper", ["partial"], ["a"], null], false]
                ]}),
                name_context("Tom"),
            )
            .unwrap();
        assert_eq!(r.html(), "TomA");
    }

    fn which(partial: &str) -> Var {
        v_map(&[("which", v_str(partial)), ("name", v_str("Tom"))])
    }

    #[test]
    fn test_dynamic_partial_switches_and_survives_unknown_names() {
        let mut r = partial_harness()
            .render(
                json!({"statements": [
                    ["append", ["helper", ["partial"], [["unknown", ["which"]]], null], false]
                ]}),
                which("a"),
            )
            .unwrap();
        assert_eq!(r.html(), "A");

        r.update(which("b"));
        r.rerender().unwrap();
        assert_eq!(r.html(), "Tom");

        r.update(which("c"));
        assert_eq!(
            r.rerender(),
            Err(RenderError::UnknownPartial("c".into()))
        );
        assert_eq!(r.html(), "Tom");

        r.update(which("a"));
        r.rerender().unwrap();
        assert_eq!(r.html(), "A");
    }

    #[test]
    fn test_unbounded_recursion_overflows() {
        let config = RenderConfig {
            max_frame_depth: 16,
            ..Default::default()
        };
        let mut harness = TestHarness::with_config(config);
        harness.registry_mut().register_partial(
            "tree",
            template(json!({"statements": [
                ["text", "node"],
                ["append", ["helper", ["partial"], ["tree"], null], false]
            ]})),
        );
        let dom = harness.dom().clone();
        let result = harness.render(
            json!({"statements": [["append", ["helper", ["partial"], ["tree"], null], false]]}),
            v_map(&[]),
        );
        assert_eq!(
            result.err(),
            Some(HarnessError::Render(RenderError::StackOverflow { depth: 16 }))
        );
        let div = dom.children(dom.document())[0];
        assert!(dom.children(div).is_empty());
    }

    struct Logged {
        log: Log,
        this: ReferenceRc,
    }

    impl Logged {
        fn push(&self, entry: &str) {
            self.log.borrow_mut().push(entry.to_string());
        }
    }

    impl Component for Logged {
        fn self_reference(&self) -> ReferenceRc {
            self.this.clone()
        }
        fn did_create_element(&self, _element: NodeId) {
            self.push("element");
        }
        fn did_render_layout(&self, _bounds: &Bounds) {
            self.push("layout");
        }
        fn update(&self, _args: &EvaluatedArgs) -> Result<(), RenderError> {
            self.push("update");
            Ok(())
        }
        fn did_update_layout(&self, _bounds: &Bounds) {
            self.push("layout updated");
        }
        fn did_create(&self) {
            self.push("created");
        }
        fn did_update(&self) {
            self.push("updated");
        }
        fn destroy(&self) {
            self.push("destroyed");
        }
    }

    struct LoggingManager {
        log: Log,
    }

    impl ComponentManager for LoggingManager {
        fn create(
            &self,
            args: &Rc<EvaluatedArgs>,
            _dynamic_scope: &DynamicScope,
            _has_default_block: bool,
        ) -> Result<Rc<dyn Component>, RenderError> {
            Ok(Rc::new(Logged {
                log: self.log.clone(),
                this: Rc::new(NamedArgsReference::new(args.clone())),
            }))
        }
    }

    fn greeting_layout() -> Arc<SerializedTemplate> {
        template(json!({
            "prelude": [
                ["open-element", "div", []],
                ["static-attr", "class", "greeting", null]
            ],
            "statements": [["append", ["arg", ["@name"]], false]],
            "named": ["@name"]
        }))
    }

    fn greeting_invocation() -> Value {
        json!({"statements": [["component", "x-greeting", {
            "attrs": [
                ["dynamic-arg", "@name", ["unknown", ["name"]]],
                ["static-attr", "id", "g", null]
            ],
            "statements": []
        }]]})
    }

    #[test]
    fn test_component_lifecycle() {
        let log: Log = Rc::new(RefCell::new(vec![]));
        let mut harness = TestHarness::new();
        harness.registry_mut().register_component(
            "x-greeting",
            Rc::new(LoggingManager { log: log.clone() }),
            greeting_layout(),
        );
        let mut r = harness
            .render(greeting_invocation(), name_context("Tom"))
            .unwrap();
        assert_eq!(r.html(), r#"<div class="greeting" id="g">Tom</div>"#);
        assert_eq!(*log.borrow(), vec!["element", "layout", "created"]);
        // The harness root is a div too.
        let div = r.dom.find_all(r.root, "div")[1];

        log.borrow_mut().clear();
        r.update(name_context("Jerry"));
        r.rerender().unwrap();
        assert_eq!(r.html(), r#"<div class="greeting" id="g">Jerry</div>"#);
        assert_eq!(r.dom.find_all(r.root, "div"), vec![r.root, div]);
        assert_eq!(*log.borrow(), vec!["update", "layout updated", "updated"]);

        // Nothing the component reads changed: its whole group is skipped.
        log.borrow_mut().clear();
        r.rerender().unwrap();
        assert!(log.borrow().is_empty());

        r.result.destroy().unwrap();
        assert_eq!(*log.borrow(), vec!["destroyed"]);
        assert_eq!(r.html(), "");
    }

    #[test]
    fn test_basic_component_self_is_named_args() {
        let mut harness = TestHarness::new();
        harness.registry_mut().register_component(
            "x-title",
            Rc::new(BasicComponentManager),
            template(json!({"statements": [["append", ["unknown", ["title"]], false]]})),
        );
        let r = harness
            .render(
                json!({"statements": [["component", "x-title", {
                    "attrs": [["static-arg", "@title", "Hello"]],
                    "statements": []
                }]]}),
                v_map(&[]),
            )
            .unwrap();
        assert_eq!(r.html(), "Hello");
    }

    #[test]
    fn test_yield_with_block_params() {
        let mut harness = TestHarness::new();
        harness.registry_mut().register_component(
            "x-card",
            Rc::new(BasicComponentManager),
            template(json!({
                "prelude": [["open-element", "section", []]],
                "statements": [["yield", "default", [["arg", ["@name"]]]]],
                "named": ["@name"],
                "yields": ["default"]
            })),
        );
        let mut r = harness
            .render(
                json!({"statements": [["component", "x-card", {
                    "attrs": [["dynamic-arg", "@name", ["unknown", ["name"]]]],
                    "statements": [
                        ["text", "Hi "],
                        ["append", ["get", ["n"]], false],
                        ["append", ["unknown", ["suffix"]], false]
                    ],
                    "locals": ["n"]
                }]]}),
                v_map(&[("name", v_str("Tom")), ("suffix", v_str("!"))]),
            )
            .unwrap();
        assert_eq!(r.html(), "<section>Hi Tom!</section>");
        r.update(v_map(&[("name", v_str("Jerry")), ("suffix", v_str("?"))]));
        r.rerender().unwrap();
        assert_eq!(r.html(), "<section>Hi Jerry?</section>");
    }

    #[test]
    fn test_has_block() {
        let mut harness = TestHarness::new();
        harness.registry_mut().register_component(
            "x-maybe",
            Rc::new(BasicComponentManager),
            template(json!({
                "statements": [["append", ["has-block", "default"], false]],
                "yields": ["default"]
            })),
        );
        let r = harness
            .render(
                json!({"statements": [
                    ["component", "x-maybe", {"statements": [["text", "x"]]}],
                    ["text", "/"],
                    ["component", "x-maybe", {"statements": []}]
                ]}),
                v_map(&[]),
            )
            .unwrap();
        assert_eq!(r.html(), "true/false");
    }

    struct Tracked {
        log: Log,
        dom: Rc<dyn DomChanges>,
        element: NodeId,
    }

    impl Modifier for Tracked {
        fn install(&self) {
            let attached = self.dom.parent(self.element).is_some();
            self.log
                .borrow_mut()
                .push(format!("install attached={attached}"));
        }
        fn update(&self) {
            self.log.borrow_mut().push("update".to_string());
        }
        fn destroy(&self) {
            self.log.borrow_mut().push("destroy".to_string());
        }
    }

    struct TrackingManager {
        log: Log,
    }

    impl ModifierManager for TrackingManager {
        fn create(
            &self,
            element: NodeId,
            _args: Rc<EvaluatedArgs>,
            dom: &Rc<dyn DomChanges>,
        ) -> Result<Rc<dyn Modifier>, RenderError> {
            Ok(Rc::new(Tracked {
                log: self.log.clone(),
                dom: dom.clone(),
                element,
            }))
        }
    }

    #[test]
    fn test_modifier_lifecycle() {
        let log: Log = Rc::new(RefCell::new(vec![]));
        let mut harness = TestHarness::new();
        harness
            .registry_mut()
            .register_modifier("track", Rc::new(TrackingManager { log: log.clone() }));
        let mut r = harness
            .render(
                json!({"statements": [
                    ["open-element", "button", []],
                    ["modifier", ["track"], [["unknown", ["n"]]], null],
                    ["flush-element"],
                    ["close-element"]
                ]}),
                v_map(&[("n", v_int(1))]),
            )
            .unwrap();
        assert_eq!(*log.borrow(), vec!["install attached=true"]);

        r.update(v_map(&[("n", v_int(2))]));
        r.rerender().unwrap();
        r.result.destroy().unwrap();
        assert_eq!(
            *log.borrow(),
            vec!["install attached=true", "update", "destroy"]
        );
    }

    #[test]
    fn test_destroy_releases_everything() {
        let mut r = render(list_template(false), items(&[item(1, "A"), item(2, "B")]));
        assert!(r.result.live_scopes() > 1);
        assert_eq!(r.result.parent_element(), Some(r.root));
        r.result.destroy().unwrap();
        assert!(r.result.is_destroyed());
        assert_eq!(r.result.live_scopes(), 0);
        assert_eq!(r.html(), "");
        assert_eq!(r.result.first_node(), None);
        assert_eq!(r.rerender(), Err(RenderError::Destroyed));
        assert_eq!(r.result.destroy(), Err(RenderError::Destroyed));
    }

    #[test]
    fn test_handle_exception_renders_from_scratch() {
        let mut r = render(paragraph_template(), name_context("Tom"));
        let p = r.dom.find_all(r.root, "p")[0];
        r.update(name_context("Jerry"));
        r.result.handle_exception().unwrap();
        assert_eq!(r.html(), "<p>Jerry</p>");
        assert_ne!(r.dom.find_all(r.root, "p"), vec![p]);
    }

    #[test]
    fn test_renders_in_front_of_next_sibling() {
        let dom = Rc::new(SimpleDom::new());
        let parent = dom.create_element("div");
        dom.insert_before(dom.document(), parent, None);
        let tail = dom.create_text("tail");
        dom.insert_before(parent, tail, None);

        let registry = Rc::new(Registry::new());
        let program =
            Rc::new(compile_template(template(paragraph_template()), registry.clone()).unwrap());
        let env = Rc::new(Environment::new(
            registry,
            Rc::new(DefaultHost),
            dom.clone(),
            RenderConfig::default(),
        ));
        let context: ReferenceRc = Rc::new(UpdatableReference::new(name_context("Tom")));
        let result = render_program(
            env,
            program.clone(),
            program.entry(),
            context,
            parent,
            Some(tail),
        )
        .unwrap();
        assert_eq!(dom.inner_html(parent), "<p>Tom</p>tail");
        assert_eq!(result.parent_element(), Some(parent));
        let last = result.last_node().unwrap();
        assert_eq!(dom.next_sibling(last), Some(tail));
    }
}
