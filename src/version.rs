/*!
    firmware version strings and the upgrade compatibility rule

    versions are fixed size zero padded ASCII strings like `PPX_MCB_V1.2.13`: a product prefix, the letter `V`, then dot separated numbers
*/

use core::cmp::Ordering;


/// bytes of a version string
pub const VERSION_SIZE: usize = 20;
/// zero padded version string as stored in registers and upgrade messages
pub type Version = [u8; VERSION_SIZE];

/// pad a version text, `None` if it is too long
pub fn version(text: &str) -> Option<Version> {
    let text = text.as_bytes();
    if text.len() > VERSION_SIZE
        {return None}
    let mut version = [0; VERSION_SIZE];
    version[.. text.len()].copy_from_slice(text);
    Some(version)
}

/// split a version in its prefix and its numeric tail, `None` if malformed
fn split(version: &[u8]) -> Option<(&[u8], &[u8])> {
    let end = version.iter().rposition(|&b| b != 0)? + 1;
    let text = &version[.. end];
    if text.contains(&0) || !text.is_ascii()
        {return None}
    let marker = text.iter().rposition(|&b| b == b'V')?;
    Some((&text[.. marker], &text[marker+1 ..]))
}

/// numeric components of a version tail, `None` on the first malformed one
fn components(tail: &[u8]) -> impl Iterator<Item=Option<u32>> + '_ {
    tail.split(|&b| b == b'.').map(|component| {
        if component.is_empty() || !component.iter().all(u8::is_ascii_digit)
            {return None}
        component.iter().try_fold(0u32, |value, &digit|
            value.checked_mul(10)?.checked_add(u32::from(digit - b'0')))
    })
}

/**
    true if a device running `old` may accept an image of version `new`

    identical versions are always compatible. Otherwise both must parse, share the same prefix and number of components, and `new` must not be lower than `old`. Anything malformed is incompatible.
*/
pub fn is_compatible(new: &Version, old: &Version) -> bool {
    if new == old
        {return true}
    let (Some((new_prefix, new_tail)), Some((old_prefix, old_tail))) = (split(new), split(old))
        else {return false};
    if new_prefix != old_prefix
        {return false}

    let mut new = components(new_tail);
    let mut old = components(old_tail);
    let mut order = Ordering::Equal;
    loop {
        match (new.next(), old.next()) {
            (None, None) => break,
            (Some(Some(new)), Some(Some(old))) => {
                if order == Ordering::Equal
                    {order = new.cmp(&old)}
            },
            // malformed component or count mismatch
            _ => return false,
        }
    }
    order != Ordering::Less
}
