//! Path-to-identifier rules
//!
//! Column and table identifiers are derived from field paths only, never
//! from values or positions, so identical input topology always yields
//! identical identifiers. Mapping definitions reference these names
//! literally.
//!
//! - Column paths join key segments with [`PATH_SEPARATOR`].
//! - An array element contributes the segment [`ARRAY_ELEMENT`] instead of
//!   its index.
//! - A child table is named `<root table>` + [`TABLE_SEPARATOR`] + the
//!   column path of the array that produced it.
//! - A key segment that is empty or contains `.` or `` ` `` is wrapped in
//!   backticks, with inner backticks doubled.

/// Name of the table holding the top-level records.
pub const ROOT_TABLE: &str = "roottable";

/// Separator between path segments in a column name.
pub const PATH_SEPARATOR: char = '.';

/// Separator between the root table name and an array path.
pub const TABLE_SEPARATOR: char = '_';

/// Segment standing in for "any element of this array".
pub const ARRAY_ELEMENT: &str = "val";

/// Escape one object key so it can be used as a path segment.
pub fn escape_segment(key: &str) -> String {
    if key.is_empty() || key.contains(PATH_SEPARATOR) || key.contains('`') {
        format!("`{}`", key.replace('`', "``"))
    } else {
        key.to_string()
    }
}

/// Append an object key to a column path.
pub fn join_key(prefix: &str, key: &str) -> String {
    join_segment(prefix, &escape_segment(key))
}

/// Path of the elements of the array at `array_path`.
pub fn element_path(array_path: &str) -> String {
    join_segment(array_path, ARRAY_ELEMENT)
}

/// Name of the child table produced by the array at `array_path`.
pub fn child_table_name(root: &str, array_path: &str) -> String {
    format!("{}{}{}", root, TABLE_SEPARATOR, array_path)
}

/// Column name for a scalar found at `path`. A scalar sitting directly at a
/// table's root (top-level scalar record, or an array of scalars at the top
/// level) has an empty path and is stored under [`ARRAY_ELEMENT`].
pub fn scalar_column(path: &str) -> String {
    if path.is_empty() {
        ARRAY_ELEMENT.to_string()
    } else {
        path.to_string()
    }
}

/// Whether `table` is produced by an array nested somewhere below
/// `ancestor`. `root` is the name of the root table of the set.
pub fn is_descendant_table(root: &str, ancestor: &str, table: &str) -> bool {
    let Some(rest) = table.strip_prefix(ancestor) else {
        return false;
    };

    if ancestor == root {
        return rest.len() > 1 && rest.starts_with(TABLE_SEPARATOR);
    }

    let element = format!("{}{}", PATH_SEPARATOR, ARRAY_ELEMENT);
    rest.strip_prefix(element.as_str())
        .is_some_and(|r| r.is_empty() || r.starts_with(PATH_SEPARATOR))
}

fn join_segment(prefix: &str, segment: &str) -> String {
    if prefix.is_empty() {
        segment.to_string()
    } else {
        format!("{}{}{}", prefix, PATH_SEPARATOR, segment)
    }
}
