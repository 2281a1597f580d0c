// SPDX-FileCopyrightText: 2025 reviveMC74 contributors
// SPDX-License-Identifier: GPL-3.0-only

pub mod prop;

use crate::{
    config::RamdiskRules,
    patch::prop::{ClearGroupOtherWrite, RamdiskPatch},
    ramdisk::RamdiskTree,
};

/// Apply every ramdisk rule from a profile. Returns the warnings of all
/// patches, in order.
pub fn apply_rules(tree: &mut RamdiskTree, rules: &RamdiskRules) -> prop::Result<Vec<String>> {
    let mut patches: Vec<Box<dyn RamdiskPatch>> = vec![];

    patches.extend(
        rules
            .properties
            .iter()
            .map(|p| Box::new(p.clone()) as Box<dyn RamdiskPatch>),
    );
    patches.extend(
        rules
            .inserts
            .iter()
            .map(|i| Box::new(i.clone()) as Box<dyn RamdiskPatch>),
    );
    patches.extend(
        rules
            .clear_group_other_write
            .iter()
            .map(|f| Box::new(ClearGroupOtherWrite(f.clone())) as Box<dyn RamdiskPatch>),
    );

    let mut warnings = vec![];

    for patch in patches {
        warnings.extend(patch.patch(tree)?);
    }

    Ok(warnings)
}
