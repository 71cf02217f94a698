use crate::output::{print_json, print_table};
use serde::Serialize;
use sieve_core::registry::{self, ActionFlags};

#[derive(Debug, Serialize)]
struct TypeInfo {
    name: &'static str,
    kind: &'static str,
    flags: Vec<String>,
    /// 0 = unlimited.
    instance_limit: usize,
    description: &'static str,
}

fn flag_names(flags: ActionFlags) -> Vec<String> {
    flags
        .iter_names()
        .map(|(name, _)| name.to_ascii_lowercase())
        .collect()
}

pub fn run(json: bool) -> anyhow::Result<()> {
    let registry = registry::global();
    let mut types: Vec<TypeInfo> = registry
        .iter()
        .map(|t| TypeInfo {
            name: t.name,
            kind: "action",
            flags: flag_names(t.flags),
            instance_limit: t.instance_limit,
            description: t.description,
        })
        .collect();
    types.extend(registry.side_effects().map(|t| TypeInfo {
        name: t.name,
        kind: "side_effect",
        flags: Vec::new(),
        instance_limit: 0,
        description: t.description,
    }));

    if json {
        return print_json(&types);
    }
    let rows: Vec<Vec<String>> = types
        .iter()
        .map(|t| {
            vec![
                t.name.to_string(),
                t.kind.to_string(),
                t.flags.join(","),
                t.description.to_string(),
            ]
        })
        .collect();
    print_table(&["NAME", "KIND", "FLAGS", "DESCRIPTION"], &rows)?;
    Ok(())
}
