use serde::Serialize;
use serde_json::Value;

/// Column limits of the `items` table, counted in characters.
pub const MAX_ITEM_NAME: usize = 512;
pub const MAX_URL: usize = 1024;
pub const MAX_SHOP_CODE: usize = 128;
pub const MAX_SHOP_NAME: usize = 255;

/// Image size fields checked in order; the first non-empty URL wins.
const IMAGE_FIELDS: [&str; 2] = ["mediumImageUrls", "smallImageUrls"];

/// One ranked entry in canonical form, ready for the upsert writer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RankedItem {
    pub rank_pos: i32,
    pub item_code: String,
    pub item_name: String,
    pub item_url: String,
    pub image_url: String,
    pub shop_code: String,
    pub shop_name: String,
    pub price: Option<i64>,
    pub review_count: Option<i64>,
    pub point_rate: Option<i64>,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum NormalizeError {
    #[error("response has no `Items` list")]
    MissingItems,
}

/// Map a raw ranking payload into ranked rows.
///
/// Every object entry consumes a position before its code is checked, so an
/// entry without `itemCode` leaves a gap in `rank_pos` and still counts
/// against `max_hits`. Non-object entries are ignored entirely.
pub fn normalize(raw: &Value, max_hits: u32) -> Result<Vec<RankedItem>, NormalizeError> {
    let entries = raw
        .get("Items")
        .and_then(Value::as_array)
        .ok_or(NormalizeError::MissingItems)?;

    let mut out = Vec::with_capacity(entries.len().min(max_hits as usize));
    let mut rank_pos: u32 = 0;
    for entry in entries {
        let item = entry.get("Item").unwrap_or(entry);
        if !item.is_object() {
            continue;
        }

        rank_pos += 1;
        if rank_pos > max_hits {
            break;
        }

        let Some(item_code) = text_field(item, "itemCode").filter(|c| !c.is_empty()) else {
            continue;
        };

        out.push(RankedItem {
            rank_pos: rank_pos as i32,
            item_code,
            item_name: truncate_chars(&text_field(item, "itemName").unwrap_or_default(), MAX_ITEM_NAME),
            item_url: truncate_chars(&text_field(item, "itemUrl").unwrap_or_default(), MAX_URL),
            image_url: truncate_chars(&first_image_url(item).unwrap_or_default(), MAX_URL),
            shop_code: truncate_chars(&text_field(item, "shopCode").unwrap_or_default(), MAX_SHOP_CODE),
            shop_name: truncate_chars(&text_field(item, "shopName").unwrap_or_default(), MAX_SHOP_NAME),
            price: int_field(item, "itemPrice"),
            review_count: int_field(item, "reviewCount"),
            point_rate: int_field(item, "pointRate"),
        });
    }
    Ok(out)
}

/// Cut `s` to at most `max` characters without splitting a multi-byte character.
pub fn truncate_chars(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((byte_idx, _)) => s[..byte_idx].to_string(),
        None => s.to_string(),
    }
}

// Codes occasionally arrive as bare numbers.
fn text_field(item: &Value, key: &str) -> Option<String> {
    match item.get(key)? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn int_field(item: &Value, key: &str) -> Option<i64> {
    match item.get(key)? {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f.trunc() as i64)),
        Value::String(s) => {
            let t = s.trim();
            t.parse::<i64>()
                .ok()
                .or_else(|| t.parse::<f64>().ok().map(|f| f.trunc() as i64))
        }
        _ => None,
    }
}

fn first_image_url(item: &Value) -> Option<String> {
    IMAGE_FIELDS.iter().find_map(|field| {
        item.get(*field)
            .and_then(Value::as_array)
            .and_then(|list| list.first())
            .and_then(|img| img.get("imageUrl"))
            .and_then(Value::as_str)
            .filter(|url| !url.is_empty())
            .map(str::to_string)
    })
}
