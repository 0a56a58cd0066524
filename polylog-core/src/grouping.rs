//! Presentation steps for an assistant turn.

use crate::types::ContentBlock;

/// Split `blocks` into display steps.
///
/// Every text block is a step of its own; each maximal run of consecutive
/// thinking and tool-call blocks forms one step. Order is preserved.
pub fn group_content_blocks(blocks: &[ContentBlock]) -> Vec<Vec<ContentBlock>> {
    let mut groups = Vec::new();
    let mut run: Vec<ContentBlock> = Vec::new();

    for block in blocks {
        if block.is_text() {
            if !run.is_empty() {
                groups.push(std::mem::take(&mut run));
            }
            groups.push(vec![block.clone()]);
        } else {
            run.push(block.clone());
        }
    }
    if !run.is_empty() {
        groups.push(run);
    }
    groups
}
