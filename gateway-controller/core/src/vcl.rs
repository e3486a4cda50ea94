//! VCL served by the gateway pods.
//!
//! The generated preamble hands all routing to the ghost VMOD, which reads
//! `ghost.json` and is reloaded over a localhost-only endpoint. User VCL from
//! the GatewayClass parameters is appended below it.

use std::fmt::Write;

pub const DEFAULT_GHOST_CONFIG_PATH: &str = "/var/run/varnish/ghost.json";

/// Generates the router preamble.
pub fn generate() -> String {
    generate_with(DEFAULT_GHOST_CONFIG_PATH)
}

pub fn generate_with(ghost_config_path: &str) -> String {
    let mut vcl = String::new();
    vcl.push_str("vcl 4.1;\n\n");
    vcl.push_str("import ghost;\n\n");

    // Varnish refuses to compile VCL without at least one backend.
    vcl.push_str("backend dummy { .host = \"127.0.0.1\"; .port = \"80\"; }\n\n");

    vcl.push_str("sub vcl_init {\n");
    let _ = writeln!(vcl, "    ghost.init({ghost_config_path:?});");
    vcl.push_str("    new router = ghost.ghost_backend();\n");
    vcl.push_str("}\n\n");

    vcl.push_str("sub vcl_recv {\n");
    vcl.push_str("    # Handle reload endpoint (localhost only)\n");
    vcl.push_str("    if (req.url == \"/.varnish-ghost/reload\" && (client.ip == \"127.0.0.1\" || client.ip == \"::1\")) {\n");
    vcl.push_str("        if (router.reload()) {\n");
    vcl.push_str("            return (synth(200, \"OK\"));\n");
    vcl.push_str("        } else {\n");
    vcl.push_str("            return (synth(500, \"Reload failed\"));\n");
    vcl.push_str("        }\n");
    vcl.push_str("    }\n");
    vcl.push_str("}\n\n");

    vcl.push_str("sub vcl_backend_fetch {\n");
    vcl.push_str("    set bereq.backend = router.backend();\n");
    vcl.push_str("}\n\n");

    vcl.push_str("# --- User VCL concatenated below ---\n");
    vcl
}

/// Appends user VCL to the generated VCL.
///
/// The result keeps the generated `vcl` version line, then every import from
/// the generated VCL followed by user imports it does not already contain,
/// then the generated body and the user body.
pub fn merge(generated: &str, user: &str) -> String {
    if user.is_empty() {
        return generated.to_string();
    }

    let gen = Parts::parse(generated);
    let usr = Parts::parse(user);

    let mut out = String::with_capacity(generated.len() + user.len());
    if let Some(version) = gen.version {
        out.push_str(version);
        out.push_str("\n\n");
    }

    for import in &gen.imports {
        out.push_str(import);
        out.push('\n');
    }
    for import in usr.imports.iter().filter(|i| !gen.imports.contains(i)) {
        out.push_str(import);
        out.push('\n');
    }
    out.push('\n');

    for body in [gen.body, usr.body] {
        if !body.is_empty() {
            out.push_str(&body);
            if !body.ends_with('\n') {
                out.push('\n');
            }
        }
    }

    out
}

#[derive(Debug, Default)]
struct Parts<'v> {
    version: Option<&'v str>,
    imports: Vec<&'v str>,
    body: String,
}

impl<'v> Parts<'v> {
    fn parse(vcl: &'v str) -> Self {
        let mut parts = Parts::default();
        let mut body = Vec::new();

        for line in vcl.split('\n') {
            let trimmed = line.trim();

            // Leading blank lines are dropped until the body starts.
            if trimmed.is_empty() && body.is_empty() {
                continue;
            }

            if trimmed.ends_with(';') {
                if trimmed.starts_with("vcl ") {
                    parts.version = Some(trimmed);
                    continue;
                }
                if trimmed.starts_with("import ") {
                    parts.imports.push(trimmed);
                    continue;
                }
            }

            body.push(line);
        }

        parts.body = body.join("\n").trim_start_matches('\n').to_string();
        parts
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn generate_preamble() {
        let vcl = generate();
        assert!(vcl.starts_with("vcl 4.1;\n\nimport ghost;\n\n"));
        assert!(vcl.contains("    ghost.init(\"/var/run/varnish/ghost.json\");\n"));
        assert!(vcl.contains("req.url == \"/.varnish-ghost/reload\""));
        assert!(vcl.contains("set bereq.backend = router.backend();"));
        assert!(vcl.ends_with("# --- User VCL concatenated below ---\n"));
    }

    #[test]
    fn merge_without_user_vcl() {
        let vcl = generate();
        assert_eq!(merge(&vcl, ""), vcl);
    }

    #[test]
    fn merge_deduplicates_imports() {
        let generated = "vcl 4.1;\n\nimport ghost;\n\nsub vcl_init {\n}\n";
        let user = "vcl 4.0;\n\nimport std;\nimport ghost;\n\nsub vcl_deliver {\n    set resp.http.x-served-by = \"varnish\";\n}";
        assert_eq!(
            merge(generated, user),
            "vcl 4.1;\n\n\
             import ghost;\n\
             import std;\n\
             \n\
             sub vcl_init {\n}\n\
             sub vcl_deliver {\n    set resp.http.x-served-by = \"varnish\";\n}\n"
        );
    }

    #[test]
    fn merge_user_body_only() {
        let merged = merge(&generate(), "sub vcl_hit {\n    return (deliver);\n}\n");
        assert!(merged.starts_with("vcl 4.1;\n\nimport ghost;\n\nbackend dummy"));
        assert!(merged.ends_with(
            "# --- User VCL concatenated below ---\nsub vcl_hit {\n    return (deliver);\n}\n"
        ));
    }
}
