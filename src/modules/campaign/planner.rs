use crate::modules::campaign::entity::Campaign;
use crate::modules::queue::RenderedTask;

/// Contiguous equal distribution of `total` recipients over `senders`
/// slots: every slot receives `total / senders`, and the first
/// `total % senders` slots receive one extra.
pub fn segment_sizes(total: usize, senders: usize) -> Vec<usize> {
    if senders == 0 {
        return vec![];
    }
    let base = total / senders;
    let extra = total % senders;
    (0..senders)
        .map(|index| base + usize::from(index < extra))
        .collect()
}

/// Map each recipient index to its sender index under the contiguous
/// distribution rule, preserving recipient order.
pub fn sender_assignments(total: usize, senders: usize) -> Vec<usize> {
    let mut assignments = Vec::with_capacity(total);
    for (sender_index, size) in segment_sizes(total, senders).into_iter().enumerate() {
        assignments.extend(std::iter::repeat(sender_index).take(size));
    }
    assignments
}

/// Build the diagnostic probe inserted after the `position`-th real
/// recipient. Probes reuse the most recently rendered content with a
/// banner prefix and carry no email-log id, so result writers treat
/// them as non-counted.
pub fn probe_task(
    campaign: &Campaign,
    position: u32,
    rendered_subject: &str,
    rendered_html: &str,
    rendered_plain: &str,
) -> RenderedTask {
    let test_after_email = campaign.test_after_email.clone().unwrap_or_default();
    RenderedTask {
        email_log_id: None,
        recipient_email: test_after_email,
        subject: format!("[TEST AFTER {position}] {rendered_subject}"),
        body_html: format!(
            "<p><strong>Test After Email #{position}</strong></p>\
             <p>This is a test email sent after {position} campaign emails.</p>{rendered_html}"
        ),
        body_plain: format!(
            "Test After Email #{position}\n\nThis is a test email sent after \
             {position} campaign emails.\n\n{rendered_plain}"
        ),
        from_name: campaign.from_name.clone(),
        custom_headers: campaign.custom_headers.clone(),
        attachments: campaign.attachments.clone(),
        custom_header_text: None,
    }
}

/// Number of probes a full run will interleave: one after every
/// `test_after_count` recipients, counted campaign-wide.
pub fn expected_probes(total_recipients: u64, test_after_count: u32) -> u64 {
    if test_after_count == 0 {
        0
    } else {
        total_recipients / test_after_count as u64
    }
}
