/// Results persistence — CSV save and load.
///
/// Line-oriented UTF-8, CRLF terminated, header first. Column order is
/// free on both sides: the writer emits the canonical order below, and
/// the reader maps columns by header label (aliases accepted), so files
/// survive column reshuffling.
///
/// Text fields (NAME, OWNER) are always double-quoted; a leading `"`
/// opens a quoted field that ends at the next `"`. Numeric fields are
/// bare. No embedded quotes are ever produced.
///
/// The writer emits depth-first pre-order with full paths, which is
/// exactly what lets the loader reconnect parents through a path map
/// without lookahead.
use crate::error::EngineError;
use crate::model::{Item, ItemFlags, ItemId, ItemKind, ItemTree, SortSpec};
use chrono::{DateTime, Utc};
use compact_str::CompactString;
use std::io::{self, BufRead, Write};

/// Column roles, independent of on-disk order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    Name,
    Files,
    Folders,
    SizeLogical,
    SizePhysical,
    Attributes,
    LastChange,
    EngineFlags,
    Owner,
}

const FIELD_COUNT: usize = 9;

/// Canonical header labels, in the writer's column order.
const HEADERS: [(&str, Field); FIELD_COUNT] = [
    ("Name", Field::Name),
    ("Files", Field::Files),
    ("Folders", Field::Folders),
    ("Size (Logical)", Field::SizeLogical),
    ("Size (Physical)", Field::SizePhysical),
    ("Attributes", Field::Attributes),
    ("Last Change", Field::LastChange),
    ("DirScope Attributes", Field::EngineFlags),
    ("Owner", Field::Owner),
];

/// Map a header label to its role. Accepts the canonical labels plus
/// common alias spellings; any "<something> Attributes" header is the
/// engine-flag column (the prefix is an application title).
fn header_role(label: &str) -> Option<Field> {
    let lower = label.trim().to_ascii_lowercase();
    match lower.as_str() {
        "name" => Some(Field::Name),
        "files" => Some(Field::Files),
        "folders" => Some(Field::Folders),
        "size (logical)" | "logical size" | "size logical" => Some(Field::SizeLogical),
        "size (physical)" | "physical size" | "size physical" => Some(Field::SizePhysical),
        "attributes" => Some(Field::Attributes),
        "last change" | "last modified" | "lastchange" => Some(Field::LastChange),
        "owner" => Some(Field::Owner),
        _ if lower.ends_with(" attributes") => Some(Field::EngineFlags),
        _ => None,
    }
}

/// Per-file column mapping resolved from the header line.
struct ColumnMap {
    index: [Option<usize>; FIELD_COUNT],
}

impl ColumnMap {
    fn from_header(fields: &[String]) -> Result<Self, String> {
        let mut index = [None; FIELD_COUNT];
        for (column, label) in fields.iter().enumerate() {
            if let Some(role) = header_role(label) {
                index[role as usize] = Some(column);
            }
        }
        for (label, role) in HEADERS {
            if role != Field::Owner && index[role as usize].is_none() {
                return Err(format!("missing required column '{label}'"));
            }
        }
        Ok(Self { index })
    }

    fn get<'a>(&self, fields: &'a [String], role: Field) -> Option<&'a str> {
        let column = self.index[role as usize]?;
        fields.get(column).map(String::as_str)
    }
}

/// Split one line into fields. A leading `"` opens a quoted field whose
/// end is the next `"`; everything else runs to the next comma.
fn split_fields(line: &str) -> Result<Vec<String>, String> {
    let chars: Vec<char> = line.chars().collect();
    let mut fields = Vec::new();
    let mut pos = 0;
    while pos < chars.len() {
        if chars[pos] == '"' {
            pos += 1;
            let start = pos;
            while pos < chars.len() && chars[pos] != '"' {
                pos += 1;
            }
            if pos >= chars.len() {
                return Err("unterminated quoted field".into());
            }
            fields.push(chars[start..pos].iter().collect());
            pos += 1; // closing quote
            if pos < chars.len() && chars[pos] == ',' {
                pos += 1;
            }
        } else {
            let start = pos;
            while pos < chars.len() && chars[pos] != ',' {
                pos += 1;
            }
            fields.push(chars[start..pos].iter().collect());
            if pos < chars.len() {
                pos += 1;
            }
        }
    }
    if line.ends_with(',') {
        fields.push(String::new());
    }
    Ok(fields)
}

/// Quote a text field, dropping any embedded quote characters — the
/// format never escapes, it forbids.
fn quoted(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('"');
    out.extend(value.chars().filter(|&c| c != '"'));
    out.push('"');
    out
}

/// 100-ns ticks → ISO-8601 UTC. Fractional digits appear only when the
/// tick count is not a whole second, so whole-second stamps stay short.
fn format_ticks(ticks: u64) -> String {
    let secs = (ticks / 10_000_000) as i64;
    let frac = ticks % 10_000_000;
    let stamp = DateTime::<Utc>::from_timestamp(secs, (frac * 100) as u32)
        .unwrap_or_else(|| DateTime::<Utc>::from_timestamp(0, 0).expect("epoch"));
    if frac == 0 {
        stamp.format("%Y-%m-%dT%H:%M:%SZ").to_string()
    } else {
        format!("{}.{:07}Z", stamp.format("%Y-%m-%dT%H:%M:%S"), frac)
    }
}

/// ISO-8601 UTC → 100-ns ticks. Accepts both the whole-second and the
/// fractional form.
fn parse_ticks(value: &str) -> Result<u64, String> {
    let parsed = DateTime::parse_from_rfc3339(value)
        .map_err(|e| format!("bad timestamp '{value}': {e}"))?;
    let secs = parsed.timestamp();
    if secs < 0 {
        return Ok(0);
    }
    Ok(secs as u64 * 10_000_000 + (parsed.timestamp_subsec_nanos() / 100) as u64)
}

fn parse_u64(value: &str, what: &str) -> Result<u64, String> {
    value
        .trim()
        .parse::<u64>()
        .map_err(|_| format!("bad {what} '{value}'"))
}

fn parse_hex(value: &str, what: &str) -> Result<u64, String> {
    let stripped = value
        .trim()
        .strip_prefix("0x")
        .or_else(|| value.trim().strip_prefix("0X"))
        .unwrap_or(value.trim());
    u64::from_str_radix(stripped, 16).map_err(|_| format!("bad {what} '{value}'"))
}

/// Write the subtree rooted at `from` in depth-first pre-order.
/// Leaf files are not descended into.
pub fn save_results(
    out: &mut impl Write,
    tree: &ItemTree,
    from: ItemId,
    include_owner: bool,
) -> io::Result<()> {
    let columns = if include_owner {
        FIELD_COUNT
    } else {
        FIELD_COUNT - 1
    };
    let header: Vec<String> = HEADERS[..columns]
        .iter()
        .map(|(label, _)| quoted(label))
        .collect();
    write!(out, "{}\r\n", header.join(","))?;

    let mut stack = vec![from];
    while let Some(id) = stack.pop() {
        let item = tree.get(id);

        // Pseudo-items have no path; everything else writes its full
        // path so the loader can reconnect parents.
        let name = match item.kind {
            ItemKind::MyComputer | ItemKind::FreeSpace | ItemKind::Unknown => {
                item.name.to_string()
            }
            _ => tree.full_path(id),
        };

        write!(
            out,
            "{},{},{},{},{},0x{:08X},{},0x{:04X}",
            quoted(&name),
            item.files,
            item.folders,
            item.size_logical,
            item.size_physical,
            item.attributes,
            format_ticks(item.last_change),
            item.type_bits(),
        )?;
        if include_owner {
            write!(out, ",{}", quoted(item.owner.as_deref().unwrap_or("")))?;
        }
        write!(out, "\r\n")?;

        if item.kind == ItemKind::File {
            continue;
        }
        for &child in item.children.iter().rev() {
            stack.push(child);
        }
    }
    out.flush()
}

/// Load a results file into a fresh tree. Any malformed header or row
/// aborts the load; the caller's existing tree is never touched.
pub fn load_results(reader: impl BufRead, sort: SortSpec) -> Result<ItemTree, EngineError> {
    let mut tree = ItemTree::with_capacity(4096);
    let mut columns: Option<ColumnMap> = None;
    // Full path → attached container, for parent reconnection.
    let mut parents: std::collections::HashMap<String, ItemId> = std::collections::HashMap::new();

    for (line_index, line) in reader.lines().enumerate() {
        let line_no = line_index + 1;
        let line = line.map_err(|e| EngineError::format(line_no, e.to_string()))?;
        let line = line.trim_end_matches(['\r', '\n']);
        if line.is_empty() {
            continue;
        }
        let fields = split_fields(line).map_err(|e| EngineError::format(line_no, e))?;

        if columns.is_none() {
            columns =
                Some(ColumnMap::from_header(&fields).map_err(|e| EngineError::format(line_no, e))?);
            continue;
        }
        let map = columns.as_ref().expect("header parsed");

        let bits = parse_hex(
            field(map, &fields, Field::EngineFlags, line_no, "engine flags")?,
            "engine flags",
        )
        .map_err(|e| EngineError::format(line_no, e))? as u16;
        let kind = ItemKind::from_bits(bits)
            .ok_or_else(|| EngineError::format(line_no, format!("unknown item kind 0x{bits:04X}")))?;
        let flags = ItemFlags(bits & 0xff00);

        let name_field = field(map, &fields, Field::Name, line_no, "name")?.to_string();
        let files = parse_u64(
            field(map, &fields, Field::Files, line_no, "files")?,
            "file count",
        )
        .map_err(|e| EngineError::format(line_no, e))?;
        let folders = parse_u64(
            field(map, &fields, Field::Folders, line_no, "folders")?,
            "folder count",
        )
        .map_err(|e| EngineError::format(line_no, e))?;
        let size_logical = parse_u64(
            field(map, &fields, Field::SizeLogical, line_no, "logical size")?,
            "logical size",
        )
        .map_err(|e| EngineError::format(line_no, e))?;
        let size_physical = parse_u64(
            field(map, &fields, Field::SizePhysical, line_no, "physical size")?,
            "physical size",
        )
        .map_err(|e| EngineError::format(line_no, e))?;
        let attributes = parse_hex(
            field(map, &fields, Field::Attributes, line_no, "attributes")?,
            "attributes",
        )
        .map_err(|e| EngineError::format(line_no, e))? as u32;
        let last_change = parse_ticks(field(map, &fields, Field::LastChange, line_no, "timestamp")?)
            .map_err(|e| EngineError::format(line_no, e))?;
        let owner = map
            .get(&fields, Field::Owner)
            .filter(|s| !s.is_empty())
            .map(CompactString::from);

        let is_root = flags.contains(ItemFlags::ROOT);
        let attaches_to_root = matches!(
            kind,
            ItemKind::Drive | ItemKind::Unknown | ItemKind::FreeSpace
        );
        let use_full_name = is_root || attaches_to_root || !has_path(kind);

        let (display_name, parent_path) = if use_full_name {
            (name_field.clone(), None)
        } else {
            let (parent, leaf) = split_parent(&name_field)
                .ok_or_else(|| EngineError::format(line_no, format!("unrooted path '{name_field}'")))?;
            (leaf.to_string(), Some(parent))
        };

        let mut item = Item {
            kind,
            flags,
            name: CompactString::from(display_name.as_str()),
            size_logical,
            size_physical,
            files,
            folders,
            last_change,
            attributes,
            owner,
            parent: None,
            children: Vec::new(),
            done: true,
            enumerated: true,
            pending_dirs: 0,
        };

        let id = if is_root {
            if tree.root().is_some() {
                return Err(EngineError::format(line_no, "second root row"));
            }
            item.flags.insert(ItemFlags::ROOT);
            tree.set_root(item)
        } else if attaches_to_root {
            let root = tree
                .root()
                .ok_or_else(|| EngineError::format(line_no, "item precedes its root"))?;
            tree.attach_loaded(root, item)
        } else {
            let parent_path = parent_path.expect("non-root path item");
            let parent = *parents.get(&parent_path).ok_or_else(|| {
                EngineError::format(line_no, format!("no parent loaded for '{name_field}'"))
            })?;
            tree.attach_loaded(parent, item)
        };

        // Containers with descendants will be referenced by later rows.
        let loaded = tree.get(id);
        if loaded.kind.is_container() && loaded.files + loaded.folders > 0 {
            parents.insert(name_field.clone(), id);
            // Drives are addressed both with and without the trailing
            // separator; register the alias.
            if kind == ItemKind::Drive {
                let trimmed = name_field.trim_end_matches(['\\', '/']);
                if trimmed != name_field {
                    parents.insert(trimmed.to_string(), id);
                }
            }
        }
    }

    if columns.is_none() {
        return Err(EngineError::format(0, "empty results file"));
    }

    // Children order is re-derived from the current sort spec.
    tree.sort(sort);
    Ok(tree)
}

/// Extract one role's value from a row.
fn field<'a>(
    map: &ColumnMap,
    fields: &'a [String],
    role: Field,
    line_no: usize,
    what: &str,
) -> Result<&'a str, EngineError> {
    map.get(fields, role)
        .ok_or_else(|| EngineError::format(line_no, format!("row is missing {what}")))
}

/// Kinds whose NAME column is a filesystem path.
fn has_path(kind: ItemKind) -> bool {
    matches!(
        kind,
        ItemKind::Drive | ItemKind::Directory | ItemKind::File | ItemKind::Reparse
    )
}

/// Split a full path into (parent path, leaf name). Accepts both
/// separators so files move between platforms.
fn split_parent(path: &str) -> Option<(String, &str)> {
    let pos = path.rfind(['/', '\\'])?;
    let leaf = &path[pos + 1..];
    let parent = if pos == 0 {
        // Children of the filesystem root: parent is the separator itself.
        path[..1].to_string()
    } else {
        path[..pos].to_string()
    };
    Some((parent, leaf))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{SortColumn, SortDirection};
    use std::io::BufReader;

    fn file(name: &str, logical: u64, physical: u64, ticks: u64, attrs: u32) -> Item {
        Item::new_file(CompactString::new(name), logical, physical, ticks, attrs, None)
    }

    fn fixture_tree() -> ItemTree {
        let mut tree = ItemTree::with_capacity(16);
        let root = tree.set_root(Item::new_directory(CompactString::new("/scan"), None));
        let a = tree.add_child(root, Item::new_directory(CompactString::new("a"), None));
        let b = tree.add_child(root, Item::new_directory(CompactString::new("b"), None));
        tree.add_child(a, file("f1.txt", 100, 512, 17_000_000_000, 0o644));
        tree.add_child(a, file("f2.log", 50, 512, 16_000_000_123, 0o644));
        tree.add_child(b, file("f3.iso", 10, 512, 15_000_000_000, 0o600));
        tree.mark_enumerated(a);
        tree.mark_enumerated(b);
        tree.mark_enumerated(root);
        tree.sort(SortSpec::default());
        tree
    }

    fn save_to_string(tree: &ItemTree) -> String {
        let mut buf = Vec::new();
        save_results(&mut buf, tree, tree.root().unwrap(), false).unwrap();
        String::from_utf8(buf).unwrap()
    }

    fn items_by_path(tree: &ItemTree) -> Vec<(String, u64, u64, u64, u64, u64, u16)> {
        let mut rows = Vec::new();
        tree.walk(tree.root().unwrap(), |id, item| {
            rows.push((
                tree.full_path(id),
                item.files,
                item.folders,
                item.size_logical,
                item.size_physical,
                item.last_change,
                item.type_bits(),
            ));
        });
        rows.sort();
        rows
    }

    #[test]
    fn writer_emits_header_and_crlf_rows() {
        let text = save_to_string(&fixture_tree());
        let mut lines = text.split("\r\n");
        let header = lines.next().unwrap();
        assert!(header.starts_with("\"Name\",\"Files\",\"Folders\""));
        // Pre-order: root first.
        let first_row = lines.next().unwrap();
        assert!(first_row.starts_with("\"/scan\","));
        assert!(first_row.ends_with("0x0104"), "root directory flags: {first_row}");
        assert!(text.ends_with("\r\n"));
    }

    #[test]
    fn round_trip_preserves_every_field() {
        let tree = fixture_tree();
        let text = save_to_string(&tree);
        let loaded = load_results(BufReader::new(text.as_bytes()), SortSpec::default()).unwrap();

        assert_eq!(items_by_path(&tree), items_by_path(&loaded));
        let root = loaded.root().unwrap();
        assert!(loaded.get(root).done);
        assert_eq!(loaded.get(root).files, 3);
        assert_eq!(loaded.get(root).folders, 2);
        assert_eq!(loaded.get(root).size_logical, 160);
    }

    #[test]
    fn loader_is_column_order_independent() {
        // Same data, shuffled columns, alias spellings.
        let text = "\"Last Change\",\"Size (Physical)\",\"MyTool Attributes\",\"Name\",\"Logical Size\",\"Folders\",\"Files\",\"Attributes\"\r\n\
            1970-01-01T00:00:10Z,4096,0x0104,\"/top\",17,0,0,0x000001A4\r\n\
            1970-01-01T00:00:10Z,4096,0x0020,\"/top/x.txt\",17,0,0,0x000001A4\r\n";
        let tree = load_results(BufReader::new(text.as_bytes()), SortSpec::default()).unwrap();
        let root = tree.root().unwrap();
        assert_eq!(tree.get(root).name, "/top");
        assert_eq!(tree.get(root).children.len(), 1);
        let child = tree.get(root).children[0];
        assert_eq!(tree.get(child).name, "x.txt");
        assert_eq!(tree.get(child).size_logical, 17);
        assert_eq!(tree.get(child).size_physical, 4096);
        assert_eq!(tree.get(child).last_change, 100_000_000);
    }

    #[test]
    fn missing_required_column_aborts() {
        let text = "\"Name\",\"Files\",\"Folders\"\r\n\"/top\",0,0\r\n";
        let err = load_results(BufReader::new(text.as_bytes()), SortSpec::default()).unwrap_err();
        assert!(matches!(err, EngineError::Format { line: 1, .. }));
    }

    #[test]
    fn malformed_row_aborts() {
        let tree = fixture_tree();
        let mut text = save_to_string(&tree);
        text.push_str("\"/scan/zz\",not_a_number,0,0,0,0x0,1970-01-01T00:00:00Z,0x0020\r\n");
        let err = load_results(BufReader::new(text.as_bytes()), SortSpec::default()).unwrap_err();
        assert!(matches!(err, EngineError::Format { .. }));
    }

    #[test]
    fn names_with_commas_round_trip() {
        let mut tree = ItemTree::with_capacity(4);
        let root = tree.set_root(Item::new_directory(CompactString::new("/scan"), None));
        tree.add_child(root, file("a, very, odd.txt", 5, 512, 0, 0));
        tree.mark_enumerated(root);

        let text = save_to_string(&tree);
        let loaded = load_results(BufReader::new(text.as_bytes()), SortSpec::default()).unwrap();
        let r = loaded.root().unwrap();
        let child = loaded.get(r).children[0];
        assert_eq!(loaded.get(child).name, "a, very, odd.txt");
    }

    #[test]
    fn fractional_timestamps_round_trip() {
        assert_eq!(format_ticks(16_000_000_123), "1970-01-01T00:26:40.0000123Z");
        assert_eq!(parse_ticks("1970-01-01T00:26:40.0000123Z").unwrap(), 16_000_000_123);
        assert_eq!(format_ticks(10_000_000), "1970-01-01T00:00:01Z");
        assert_eq!(parse_ticks("1970-01-01T00:00:01Z").unwrap(), 10_000_000);
    }

    #[test]
    fn example_row_shape() {
        // A plain file row matches the documented byte layout.
        let mut tree = ItemTree::with_capacity(2);
        let root = tree.set_root(Item::new_directory(CompactString::new("/u"), None));
        let mut f = file("x.txt", 17, 4096, 0, 0x20);
        f.last_change = parse_ticks("2024-03-01T10:15:30Z").unwrap();
        tree.add_child(root, f);

        let text = save_to_string(&tree);
        let row = text.split("\r\n").nth(2).unwrap();
        assert_eq!(
            row,
            "\"/u/x.txt\",0,0,17,4096,0x00000020,2024-03-01T10:15:30Z,0x0020"
        );
    }

    #[test]
    fn pseudo_items_attach_to_the_root() {
        let mut tree = ItemTree::with_capacity(4);
        let root = tree.set_root(Item::new_directory(CompactString::new("/"), None));
        let mut free = Item::new_leaf(
            ItemKind::FreeSpace,
            CompactString::new("<Free Space>"),
            None,
        );
        free.size_logical = 1234;
        free.size_physical = 1234;
        tree.add_child(root, free);
        tree.add_child(root, file("f.bin", 10, 512, 0, 0));
        tree.mark_enumerated(root);

        let text = save_to_string(&tree);
        let loaded = load_results(BufReader::new(text.as_bytes()), SortSpec::default()).unwrap();
        let r = loaded.root().unwrap();
        let kinds: Vec<ItemKind> = loaded
            .get(r)
            .children
            .iter()
            .map(|&c| loaded.get(c).kind)
            .collect();
        assert!(kinds.contains(&ItemKind::FreeSpace));
        assert!(kinds.contains(&ItemKind::File));
    }

    #[test]
    fn loader_resorts_by_requested_spec() {
        let tree = fixture_tree();
        let text = save_to_string(&tree);
        let spec = SortSpec {
            column: SortColumn::Name,
            direction: SortDirection::Ascending,
        };
        let loaded = load_results(BufReader::new(text.as_bytes()), spec).unwrap();
        let r = loaded.root().unwrap();
        let names: Vec<_> = loaded
            .get(r)
            .children
            .iter()
            .map(|&c| loaded.get(c).name.clone())
            .collect();
        assert_eq!(names, vec!["a", "b"]);
    }
}
