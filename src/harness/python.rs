use serde_json::{Map, Value};

use crate::harness::template::SourceBuilder;

const PROLOGUE: &str = r#"import base64 as __snipbox_base64
import inspect as __snipbox_inspect
import io as __snipbox_io
import json as __snipbox_json
import sys as __snipbox_sys
import types as __snipbox_types
import warnings as __snipbox_warnings

__snipbox_warnings.filterwarnings("ignore", category=UserWarning)
__snipbox_warnings.filterwarnings("ignore", category=FutureWarning)
__snipbox_warnings.filterwarnings("ignore", category=DeprecationWarning)
"#;

/// Skipped silently when matplotlib is unavailable, so the snippet's own
/// import reports the problem.
const PLOTTING_SETUP: &str = r#"import logging as __snipbox_logging
__snipbox_logging.getLogger("matplotlib").setLevel(__snipbox_logging.ERROR)
try:
    import matplotlib as __snipbox_mpl
    __snipbox_mpl.use("Agg")
    from matplotlib import font_manager as __snipbox_font_manager

    __snipbox_font_chain = [
        "Noto Sans CJK SC",
        "Noto Sans CJK TC",
        "Noto Sans CJK JP",
        "Noto Sans CJK KR",
        "SimHei",
        "Microsoft YaHei",
        "WenQuanYi Micro Hei",
        "DejaVu Sans",
        "Arial Unicode MS",
        "Liberation Sans",
        "Droid Sans Fallback",
        "FreeSans",
    ]
    __snipbox_installed_fonts = {entry.name for entry in __snipbox_font_manager.fontManager.ttflist}
    __snipbox_font = next(
        (name for name in __snipbox_font_chain if name in __snipbox_installed_fonts),
        "DejaVu Sans",
    )
    __snipbox_mpl.rcParams["font.family"] = "sans-serif"
    __snipbox_mpl.rcParams["font.sans-serif"] = [__snipbox_font, "DejaVu Sans"]
    __snipbox_mpl.rcParams["axes.unicode_minus"] = False
    __snipbox_mpl.rcParams["font.size"] = 12
    __snipbox_mpl.rcParams["figure.dpi"] = 100
    __snipbox_mpl.rcParams["savefig.dpi"] = 150
    __snipbox_mpl.rcParams["savefig.bbox"] = "tight"
except (ImportError, OSError):
    pass
"#;

const EPILOGUE: &str = r#"
def __snipbox_sanitize(value):
    try:
        __snipbox_json.dumps(value, ensure_ascii=False, allow_nan=False)
        return value
    except (TypeError, ValueError, OverflowError, RecursionError):
        return str(value)


def __snipbox_call_main(namespace):
    entry = namespace.get("main")
    if not callable(entry):
        return namespace.get("result")
    try:
        params = list(__snipbox_inspect.signature(entry).parameters.values())
    except (TypeError, ValueError):
        params = []
    args = []
    kwargs = {}
    positional_open = True
    for param in params:
        if param.kind in (param.VAR_POSITIONAL, param.VAR_KEYWORD):
            continue
        present = param.name in namespace
        if param.kind is param.POSITIONAL_ONLY:
            if present and positional_open:
                args.append(namespace[param.name])
            else:
                positional_open = False
        elif present:
            kwargs[param.name] = namespace[param.name]
    try:
        return entry(*args, **kwargs)
    except Exception:
        return namespace.get("result")


__snipbox_skipped_types = (
    __snipbox_types.ModuleType,
    __snipbox_types.FunctionType,
    __snipbox_types.BuiltinFunctionType,
    type,
)


def __snipbox_collect(namespace):
    collected = {}
    for name, value in list(namespace.items()):
        if name.startswith("__") or name in __snipbox_injected:
            continue
        if isinstance(value, __snipbox_skipped_types):
            continue
        collected[name] = __snipbox_sanitize(value)
    return collected


def __snipbox_capture_images():
    pyplot = __snipbox_sys.modules.get("matplotlib.pyplot")
    if pyplot is None:
        return []
    images = []
    try:
        for number in pyplot.get_fignums():
            figure = pyplot.figure(number)
            buffer = __snipbox_io.BytesIO()
            figure.savefig(buffer, format="png", dpi=150, bbox_inches="tight", facecolor="white")
            encoded = __snipbox_base64.b64encode(buffer.getvalue()).decode("ascii")
            images.append("data:image/png;base64," + encoded)
    finally:
        pyplot.close("all")
    return images


__snipbox_real_stdout = __snipbox_sys.stdout
__snipbox_sys.stdout = __snipbox_io.StringIO()
try:
    exec(compile(__snipbox_source, "<user_code>", "exec"), globals())
    __snipbox_seed = __snipbox_call_main(globals())
    __snipbox_output = __snipbox_collect(globals())
    if isinstance(__snipbox_seed, dict):
        for __snipbox_key, __snipbox_value in __snipbox_seed.items():
            __snipbox_output[str(__snipbox_key)] = __snipbox_sanitize(__snipbox_value)
    elif __snipbox_seed is not None:
        __snipbox_output["result"] = __snipbox_sanitize(__snipbox_seed)
    __snipbox_images = __snipbox_capture_images()
    if __snipbox_images:
        __snipbox_output["matplotlib_images"] = __snipbox_images
finally:
    __snipbox_sys.stdout = __snipbox_real_stdout

if not __snipbox_output:
    __snipbox_output = {"success": True}
print(__snipbox_json.dumps(__snipbox_output, ensure_ascii=False, allow_nan=False))
"#;

/// Assemble the Python harness around `code`.
pub(crate) fn render(code: &str, variables: &Map<String, Value>, plotting: bool) -> String {
    let mut builder = SourceBuilder::new();
    builder.fixed(PROLOGUE);

    if plotting {
        builder.fixed(PLOTTING_SETUP);
    }

    for (key, value) in variables {
        builder.python_variable(key, value);
    }

    let injected: Vec<&String> = variables.keys().collect();
    let injected = serde_json::to_string(&injected).unwrap_or_else(|_| "[]".to_string());
    builder
        .string_binding("__snipbox_injected_json", &injected, false)
        .fixed("__snipbox_injected = frozenset(__snipbox_json.loads(__snipbox_injected_json))")
        .string_binding("__snipbox_source", code, false)
        .fixed(EPILOGUE);

    builder.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn vars(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap_or_default()
    }

    #[test]
    fn test_user_code_is_a_string_literal() {
        let code = "result = 1\n\"\"\"\nprint('escape')\n";
        let source = render(code, &Map::new(), false);
        assert!(source.contains(r#"__snipbox_source = "result = 1\n\"\"\"\nprint('escape')\n""#));
        assert!(!source.contains("\nprint('escape')\n"));
    }

    #[test]
    fn test_variables_precede_user_code() {
        let source = render("result = x + 1", &vars(json!({"x": 5, "y": "a\"b"})), false);
        let x = source.find("x = 5\n").unwrap();
        let y = source.find("y = \"a\\\"b\"\n").unwrap();
        let user = source.find("__snipbox_source = ").unwrap();
        assert!(x < user && y < user);
        assert!(source.contains(r#"__snipbox_injected_json = "[\"x\",\"y\"]""#));
    }

    #[test]
    fn test_plotting_setup_only_when_requested() {
        let plain = render("result = 1", &Map::new(), false);
        assert!(!plain.contains("__snipbox_mpl"));

        let plotting = render("import matplotlib.pyplot as plt", &Map::new(), true);
        assert!(plotting.contains("    __snipbox_mpl.use(\"Agg\")"));
        assert!(plotting.contains("\"Noto Sans CJK SC\""));
        let setup = plotting.find("__snipbox_mpl.use").unwrap();
        let user = plotting.find("__snipbox_source = ").unwrap();
        assert!(setup < user);
    }

    #[test]
    fn test_plotting_setup_tolerates_missing_matplotlib() {
        let source = render("result = 1", &Map::new(), true);
        let guard = source.find("try:\n    import matplotlib as __snipbox_mpl").unwrap();
        let handler = source.find("except (ImportError, OSError):\n    pass\n").unwrap();
        assert!(guard < handler);
        assert!(!source.contains("\nimport matplotlib"));
    }

    #[test]
    fn test_figures_are_captured_as_png_data_urls() {
        let source = render("result = 1", &Map::new(), false);
        let capture = source.find("__snipbox_images = __snipbox_capture_images()").unwrap();
        let collect = source.find("__snipbox_output = __snipbox_collect(globals())").unwrap();
        assert!(collect < capture);
        assert!(source.contains("__snipbox_sys.modules.get(\"matplotlib.pyplot\")"));
        assert!(source.contains("\"data:image/png;base64,\" + encoded"));
        assert!(source.contains("__snipbox_output[\"matplotlib_images\"] = __snipbox_images"));
        assert!(source.contains("    finally:\n        pyplot.close(\"all\")"));
    }

    #[test]
    fn test_failing_main_falls_back_to_result() {
        let source = render("result = 7\ndef main():\n    raise ValueError()\n", &Map::new(), false);
        assert!(source.contains(
            "    try:\n        return entry(*args, **kwargs)\n    except Exception:\n        return namespace.get(\"result\")"
        ));
    }

    #[test]
    fn test_internal_names_are_prefixed() {
        let source = render("", &Map::new(), true);
        for line in source.lines() {
            if let Some((target, _)) = line.split_once(" = ") {
                if !target.starts_with(' ') && !target.contains('[') && !target.contains('(') {
                    assert!(target.starts_with("__snipbox_"), "unprefixed binding: {line}");
                }
            }
        }
    }
}
