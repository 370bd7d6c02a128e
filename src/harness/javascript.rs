use serde_json::{Map, Value};

use crate::harness::template::SourceBuilder;

const HOST_PROLOGUE: &str = r#"'use strict';
const __snipbox_vm = require('vm');
"#;

/// Runs inside the context. Builds console and variables from primitives so
/// no host-realm object is reachable from user code.
const CONTEXT_BOOTSTRAP: &str = r#"(function () {
  const noop = function () {};
  globalThis.console = {
    log: noop, info: noop, warn: noop, error: noop,
    debug: noop, trace: noop, dir: noop, table: noop,
  };
  const vars = JSON.parse(globalThis.__snipbox_payload);
  delete globalThis.__snipbox_payload;
  for (const key of Object.keys(vars)) {
    globalThis[key] = vars[key];
  }
  if (!Object.prototype.hasOwnProperty.call(globalThis, 'variables')) {
    globalThis.variables = vars;
  }
})();"#;

/// Runs inside the context after the user script.
const CONTEXT_EPILOGUE: &str = r#"(function () {
  const injected = new Set(JSON.parse(globalThis.__snipbox_injected));
  const sanitize = function (value) {
    if (value === undefined) return null;
    try {
      const text = JSON.stringify(value);
      return text === undefined ? String(value) : JSON.parse(text);
    } catch (e) {
      return String(value);
    }
  };
  const collect = function () {
    const out = {};
    for (const name of Object.keys(globalThis)) {
      if (name.startsWith('__') || name === 'console' || injected.has(name)) continue;
      const value = globalThis[name];
      if (typeof value === 'function') continue;
      out[name] = sanitize(value);
    }
    return out;
  };
  const fallback = function () {
    return typeof result === 'undefined' ? undefined : result;
  };
  const finish = function (seed) {
    const out = collect();
    if (seed !== null && typeof seed === 'object' && !Array.isArray(seed)) {
      for (const key of Object.keys(seed)) out[key] = sanitize(seed[key]);
    } else if (seed !== undefined && seed !== null) {
      out.result = sanitize(seed);
    }
    globalThis.__snipbox_output = JSON.stringify(
      Object.keys(out).length > 0 ? out : { success: true }
    );
  };
  const fail = function (err) {
    globalThis.__snipbox_error = String(err && err.stack ? err.stack : err);
  };
  if (typeof main !== 'function') {
    finish(fallback());
    return;
  }
  let seed;
  try {
    seed = main(typeof variables === 'undefined' ? {} : variables);
  } catch (e) {
    finish(fallback());
    return;
  }
  Promise.resolve(seed)
    .then(finish, function () { finish(fallback()); })
    .catch(fail);
})();"#;

/// The context object has no prototype and string compilation is off, so
/// `this.constructor.constructor` cannot reach the host `Function`.
const HOST_RUN: &str = r#"
const __snipbox_context = __snipbox_vm.createContext(Object.create(null), {
  codeGeneration: { strings: false, wasm: false },
});
__snipbox_context.__snipbox_payload = __snipbox_payload;
__snipbox_context.__snipbox_injected = __snipbox_injected;

try {
  __snipbox_vm.runInContext(__snipbox_bootstrap, __snipbox_context);
  __snipbox_vm.runInContext(__snipbox_source, __snipbox_context, {
    filename: '<user_code>',
    timeout: __snipbox_timeout,
  });
  __snipbox_vm.runInContext(__snipbox_epilogue, __snipbox_context, {
    timeout: __snipbox_timeout,
  });
} catch (err) {
  process.stderr.write(String(err && err.stack ? err.stack : err) + '\n');
  process.exit(1);
}

(function __snipbox_wait() {
  const error = __snipbox_context.__snipbox_error;
  if (typeof error === 'string') {
    process.stderr.write(error + '\n');
    process.exitCode = 1;
    return;
  }
  const output = __snipbox_context.__snipbox_output;
  if (typeof output === 'string') {
    process.stdout.write(output + '\n');
    return;
  }
  setTimeout(__snipbox_wait, 1);
})();
"#;

/// Assemble the Node harness around `code`.
pub(crate) fn render(code: &str, variables: &Map<String, Value>, timeout_ms: u64) -> String {
    let payload = serde_json::to_string(variables).unwrap_or_else(|_| "{}".to_string());

    let mut injected: Vec<&str> = variables.keys().map(String::as_str).collect();
    if !variables.contains_key("variables") {
        injected.push("variables");
    }
    let injected = serde_json::to_string(&injected).unwrap_or_else(|_| "[]".to_string());

    let mut builder = SourceBuilder::new();
    builder
        .fixed(HOST_PROLOGUE)
        .string_binding("__snipbox_payload", &payload, true)
        .string_binding("__snipbox_injected", &injected, true)
        .string_binding("__snipbox_bootstrap", CONTEXT_BOOTSTRAP, true)
        .string_binding("__snipbox_epilogue", CONTEXT_EPILOGUE, true)
        .string_binding("__snipbox_source", code, true)
        .number_binding("__snipbox_timeout", timeout_ms.max(1), true)
        .fixed(HOST_RUN);

    builder.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_payload_and_source_are_literals() {
        let variables = json!({"name": "x'`${y}`"}).as_object().cloned().unwrap();
        let source = render("const r = `${name}`;\nresult = r;", &variables, 5000);

        assert!(source.contains(r#"const __snipbox_payload = "{\"name\":\"x'`${y}`\"}";"#));
        assert!(source.contains(r#"const __snipbox_source = "const r = `${name}`;\nresult = r;";"#));
        assert!(source.contains("const __snipbox_timeout = 5000;"));
    }

    #[test]
    fn test_variables_name_is_injected() {
        let source = render("", &Map::new(), 1000);
        assert!(source.contains(r#"const __snipbox_injected = "[\"variables\"]";"#));

        let variables = json!({"variables": 1}).as_object().cloned().unwrap();
        let source = render("", &variables, 1000);
        assert!(source.contains(r#"const __snipbox_injected = "[\"variables\"]";"#));
    }

    #[test]
    fn test_user_code_runs_in_vm_context() {
        let source = render("result = 1", &Map::new(), 1000);
        assert!(source.contains("__snipbox_vm.createContext(Object.create(null), {"));
        assert!(source.contains("codeGeneration: { strings: false, wasm: false }"));
        assert!(!source.contains("createContext({})"));
        assert!(source.contains("filename: '<user_code>'"));
        assert!(!source.contains("\nresult = 1\n"));
    }
}
