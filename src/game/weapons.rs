//! Weapon display names.
//!
//! Gamelog kill packets carry `(weapon-type, weapon-id)` where the id indexes
//! the game's weapon-info table. Only ids that show up in multiplayer kill
//! credits are mapped; the rest render with their raw id.

/// Display name for a kill-credit weapon.
pub fn weapon_name(weapon_type: u8, weapon_id: u8) -> String {
    // Type 0 covers ship weapons; other namespaces (robot weapons, reactor
    // blast) have no stable table and fall through to the raw form.
    if weapon_type == 0 {
        if let Some(name) = ship_weapon_name(weapon_id) {
            return name.to_string();
        }
    }
    format!("weapon {weapon_id}")
}

fn ship_weapon_name(id: u8) -> Option<&'static str> {
    Some(match id {
        0..=3 => "Laser",
        8 => "Concussion Missile",
        9 => "Flare",
        11 => "Vulcan Cannon",
        12 => "Spreadfire Cannon",
        13 => "Plasma Cannon",
        14 => "Fusion Cannon",
        15 => "Homing Missile",
        16 => "Proximity Bomb",
        17 => "Smart Missile",
        18 => "Mega Missile",
        // D2 additions
        27 => "Gauss Cannon",
        28 => "Helix Cannon",
        29 => "Phoenix Cannon",
        30 => "Omega Cannon",
        31 => "Flash Missile",
        32 => "Guided Missile",
        33 => "Super Laser",
        35 => "Mercury Missile",
        36 => "Earthshaker Missile",
        37 => "Smart Mine",
        _ => return None,
    })
}
