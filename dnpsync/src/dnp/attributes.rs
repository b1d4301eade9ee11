//! Accessors for the DNP-related fields of symbols, footprints and pads.
//!
//! Properties are the ordered `(property "Name" "Value" ...)` children of a symbol
//! or footprint. Footprints saved by KiCad 6/7 keep Reference and Value in
//! `(fp_text reference "R1" ...)` instead, which the property accessors fall back to.
//!
//! Every setter returns whether it changed the tree and leaves it untouched when the
//! value already matches, so a normalized file renders back identically.

use uuid::Uuid;

use crate::parser::sexp::SExp;

pub const REFERENCE: &str = "Reference";
pub const DNP_PROPERTY: &str = "DNP";

pub const EXCLUDE_FROM_POS_FILES: &str = "exclude_from_pos_files";
pub const EXCLUDE_FROM_BOM: &str = "exclude_from_bom";

pub const PASTE_LAYERS: [&str; 3] = ["F.Paste", "B.Paste", "*.Paste"];

/// Token order KiCad writes inside `(attr ...)`.
const ATTR_ORDER: [&str; 8] = [
    "smd",
    "through_hole",
    "board_only",
    EXCLUDE_FROM_POS_FILES,
    EXCLUDE_FROM_BOM,
    "allow_missing_courtyard",
    "dnp",
    "allow_soldermask_bridges",
];

/// Items a new `(attr ...)` is placed after, whichever comes last.
const ATTR_ANCHORS: [&str; 10] = [
    "layer",
    "uuid",
    "tstamp",
    "at",
    "descr",
    "tags",
    "property",
    "path",
    "sheetname",
    "sheetfile",
];

// Properties

fn property_name(item: &SExp) -> Option<&str> {
    if item.tag() != Some("property") {
        return None;
    }
    item.as_list()?.get(1)?.as_atom()
}

fn fp_text_kind(name: &str) -> Option<&'static str> {
    match name {
        REFERENCE => Some("reference"),
        "Value" => Some("value"),
        _ => None,
    }
}

fn find_property(items: &[SExp], name: &str) -> Option<usize> {
    items.iter().position(|item| property_name(item) == Some(name))
}

fn find_fp_text(items: &[SExp], name: &str) -> Option<usize> {
    let kind = fp_text_kind(name)?;
    items.iter().position(|item| {
        item.tag() == Some("fp_text")
            && item.as_list().and_then(|l| l.get(1)).and_then(SExp::as_atom) == Some(kind)
    })
}

pub fn get_property<'a>(entity: &'a SExp, name: &str) -> Option<&'a str> {
    let items = entity.as_list()?;
    let index = find_property(items, name).or_else(|| find_fp_text(items, name))?;
    items[index].as_list()?.get(2)?.as_atom()
}

/// Property names in document order.
pub fn property_names(entity: &SExp) -> Vec<&str> {
    entity
        .as_list()
        .unwrap_or(&[])
        .iter()
        .filter_map(property_name)
        .collect()
}

/// Overwrites `name` in place, or appends it after the last property.
///
/// A new property copies the layout of the last existing one (position, effects)
/// with a fresh uuid; with no property to copy it is written bare.
pub fn set_property(entity: &mut SExp, name: &str, value: &str) -> bool {
    let Some(items) = entity.as_list_mut() else {
        return false;
    };

    let existing = {
        let list: &[SExp] = items;
        find_property(list, name).or_else(|| find_fp_text(list, name))
    };
    if let Some(index) = existing {
        return match items[index].as_list_mut().and_then(|l| l.get_mut(2)) {
            Some(atom) => atom.set_atom(value),
            None => false,
        };
    }

    let last = items.iter().rposition(|item| item.tag() == Some("property"));
    let node = match last {
        Some(index) => property_from_template(&items[index], name, value),
        None => SExp::list(vec![
            SExp::symbol("property"),
            SExp::string(name),
            SExp::string(value),
        ]),
    };
    let at = last.map_or(items.len(), |index| index + 1);
    items.insert(at, node);
    true
}

fn property_from_template(template: &SExp, name: &str, value: &str) -> SExp {
    let mut node = template.clone();
    if let Some(parts) = node.as_list_mut() {
        if let Some(atom) = parts.get_mut(1) {
            atom.set_atom(name);
        }
        if let Some(atom) = parts.get_mut(2) {
            atom.set_atom(value);
        }
        if let Some(uuid) = parts.iter_mut().find(|p| p.tag() == Some("uuid")) {
            if let Some(id) = uuid.as_list_mut().and_then(|l| l.get_mut(1)) {
                id.set_atom(&Uuid::new_v4().to_string());
            }
        }
    }
    node
}

/// Deletes every property called `name`, keeping the order of the rest.
/// Returns the value of the first one removed.
pub fn remove_property(entity: &mut SExp, name: &str) -> Option<String> {
    let items = entity.as_list_mut()?;
    let mut removed = None;
    while let Some(index) = find_property(items, name) {
        let node = items.remove(index);
        if removed.is_none() {
            removed = Some(
                node.as_list()
                    .and_then(|l| l.get(2))
                    .and_then(SExp::as_atom)
                    .unwrap_or_default()
                    .to_string(),
            );
        }
    }
    removed
}

pub fn designator(entity: &SExp) -> Option<&str> {
    get_property(entity, REFERENCE)
}

// yes/no flags

fn yes_no(entity: &SExp, key: &str) -> Option<bool> {
    match entity.value_of(key)? {
        "yes" => Some(true),
        "no" => Some(false),
        _ => None,
    }
}

fn set_yes_no(entity: &mut SExp, key: &str, value: bool, anchors: &[&str]) -> bool {
    let token = if value { "yes" } else { "no" };
    let Some(items) = entity.as_list_mut() else {
        return false;
    };

    if let Some(index) = items.iter().position(|item| item.tag() == Some(key)) {
        let Some(parts) = items[index].as_list_mut() else {
            return false;
        };
        return match parts.get_mut(1) {
            Some(atom) => atom.set_atom(token),
            None => {
                parts.push(SExp::symbol(token));
                true
            }
        };
    }

    let mut node = SExp::list(vec![SExp::symbol(key), SExp::symbol(token)]);
    let anchor = items
        .iter()
        .rposition(|item| item.tag().map_or(false, |tag| anchors.contains(&tag)));
    let at = match anchor {
        Some(index) => {
            node.set_lead(items[index].lead().map(str::to_string));
            index + 1
        }
        None => items.len(),
    };
    items.insert(at, node);
    true
}

/// `(dnp yes)`; symbols written before KiCad 7 have no such node and count as populated.
pub fn symbol_dnp(symbol: &SExp) -> bool {
    yes_no(symbol, "dnp").unwrap_or(false)
}

pub fn set_symbol_dnp(symbol: &mut SExp, dnp: bool) -> bool {
    if !dnp && symbol.find("dnp").is_none() {
        return false;
    }
    set_yes_no(
        symbol,
        "dnp",
        dnp,
        &["lib_id", "at", "mirror", "unit", "exclude_from_sim", "in_bom", "on_board"],
    )
}

/// `(in_bom yes)`; a missing node means the symbol is in the BOM.
pub fn symbol_in_bom(symbol: &SExp) -> bool {
    yes_no(symbol, "in_bom").unwrap_or(true)
}

pub fn set_symbol_in_bom(symbol: &mut SExp, in_bom: bool) -> bool {
    if in_bom && symbol.find("in_bom").is_none() {
        return false;
    }
    set_yes_no(
        symbol,
        "in_bom",
        in_bom,
        &["lib_id", "at", "mirror", "unit", "exclude_from_sim"],
    )
}

// Footprint attributes

fn attr_rank(token: &str) -> usize {
    ATTR_ORDER
        .iter()
        .position(|t| *t == token)
        .unwrap_or(usize::MAX)
}

/// Whether `(attr ...)` carries `flag`.
pub fn footprint_flag(footprint: &SExp, flag: &str) -> bool {
    footprint
        .find("attr")
        .and_then(SExp::as_list)
        .map_or(false, |tokens| {
            tokens.iter().skip(1).any(|t| t.as_atom() == Some(flag))
        })
}

/// Adds or removes `flag` in `(attr ...)`, creating the node when needed and
/// dropping it when the last token goes.
pub fn set_footprint_flag(footprint: &mut SExp, flag: &str, value: bool) -> bool {
    if footprint_flag(footprint, flag) == value {
        return false;
    }
    let Some(items) = footprint.as_list_mut() else {
        return false;
    };

    let Some(index) = items.iter().position(|item| item.tag() == Some("attr")) else {
        // value is true here: an absent flag already reads as false
        let mut node = SExp::list(vec![SExp::symbol("attr"), SExp::symbol(flag)]);
        let anchor = items.iter().rposition(|item| {
            item.tag()
                .map_or(false, |tag| ATTR_ANCHORS.contains(&tag))
        });
        let at = match anchor {
            Some(i) => {
                node.set_lead(items[i].lead().map(str::to_string));
                i + 1
            }
            None => items.len(),
        };
        items.insert(at, node);
        return true;
    };

    let emptied = match items[index].as_list_mut() {
        Some(tokens) if value => {
            let rank = attr_rank(flag);
            let at = tokens
                .iter()
                .enumerate()
                .skip(1)
                .filter(|(_, t)| t.as_atom().map_or(false, |a| attr_rank(a) < rank))
                .map(|(i, _)| i + 1)
                .last()
                .unwrap_or(1);
            tokens.insert(at, SExp::symbol(flag));
            false
        }
        Some(tokens) => {
            tokens.retain(|t| t.as_atom() != Some(flag));
            tokens.len() == 1
        }
        None => false,
    };
    if emptied {
        items.remove(index);
    }
    true
}

pub fn exclude_from_pos_files(footprint: &SExp) -> bool {
    footprint_flag(footprint, EXCLUDE_FROM_POS_FILES)
}

pub fn exclude_from_bom(footprint: &SExp) -> bool {
    footprint_flag(footprint, EXCLUDE_FROM_BOM)
}

// Pads

pub fn is_paste_layer(layer: &str) -> bool {
    PASTE_LAYERS.contains(&layer)
}

pub fn pad_layers(pad: &SExp) -> Vec<&str> {
    pad.find("layers")
        .and_then(SExp::as_list)
        .map(|l| l.iter().skip(1).filter_map(SExp::as_atom).collect())
        .unwrap_or_default()
}

pub fn pad_has_paste(pad: &SExp) -> bool {
    pad_layers(pad).into_iter().any(is_paste_layer)
}

/// A pad that exists only on paste layers, such as a paste window over an
/// exposed pad.
pub fn is_paste_aperture(pad: &SExp) -> bool {
    let layers = pad_layers(pad);
    !layers.is_empty() && layers.into_iter().all(is_paste_layer)
}

/// Strips every paste layer from the pad. Returns the layers removed.
/// Paste apertures are left alone: a pad needs at least one layer.
pub fn remove_paste(pad: &mut SExp) -> Vec<String> {
    if is_paste_aperture(pad) {
        return Vec::new();
    }
    let Some(layers) = pad.find_mut("layers").and_then(SExp::as_list_mut) else {
        return Vec::new();
    };
    let mut removed = Vec::new();
    let mut index = 1;
    while index < layers.len() {
        match layers[index].as_atom() {
            Some(layer) if is_paste_layer(layer) => {
                removed.push(layer.to_string());
                layers.remove(index);
            }
            _ => index += 1,
        }
    }
    removed
}

/// Adds `layer` to the pad unless present, in front of the first mask layer
/// (`"F.Cu" "F.Paste" "F.Mask"`). Quoting follows the existing layer names.
pub fn add_pad_layer(pad: &mut SExp, layer: &str) -> bool {
    let Some(items) = pad.as_list_mut() else {
        return false;
    };
    let Some(index) = items.iter().position(|item| item.tag() == Some("layers")) else {
        items.push(SExp::list(vec![SExp::symbol("layers"), SExp::string(layer)]));
        return true;
    };
    let Some(layers) = items[index].as_list_mut() else {
        return false;
    };
    if layers.iter().skip(1).any(|l| l.as_atom() == Some(layer)) {
        return false;
    }

    let quoted = layers.get(1).map_or(true, SExp::is_quoted);
    let node = if quoted {
        SExp::string(layer)
    } else {
        SExp::symbol(layer)
    };
    let at = layers
        .iter()
        .skip(1)
        .position(|l| l.as_atom().map_or(false, |a| a.ends_with(".Mask")))
        .map_or(layers.len(), |i| i + 1);
    layers.insert(at, node);
    true
}
