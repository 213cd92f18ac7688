use ipnet::IpNet;
use netipam_core::addr::{contains, sort_key};
use uuid::Uuid;

/// Final hierarchy values for one prefix record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HierarchyEntry {
    pub id: Uuid,
    /// Strictly-containing prefixes in the same scope
    pub depth: u32,
    /// Strictly-contained prefixes in the same scope
    pub children: u64,
}

/// An open ancestor: every record sharing one exact CIDR.
struct Frame {
    ids: Vec<Uuid>,
    net: IpNet,
    /// Records in the frames below this one
    ancestors: u32,
    children: u64,
}

enum Step {
    Pop,
    Merge,
    Push,
}

fn same_network(a: &IpNet, b: &IpNet) -> bool {
    a.prefix_len() == b.prefix_len() && a.network() == b.network()
}

/// Compute depth and child counts for all prefixes of one scope in a single
/// stack sweep.
///
/// Input is ordered by (family, network address, mask length) and then by id
/// before the sweep, so a containing prefix is always visited before
/// anything it contains and duplicate CIDRs are adjacent. Records sharing a
/// CIDR collapse into one frame and receive identical values; each of them
/// still counts as a separate ancestor or descendant of the others.
pub fn sweep<I>(prefixes: I) -> Vec<HierarchyEntry>
where
    I: IntoIterator<Item = (Uuid, IpNet)>,
{
    let mut ordered: Vec<(Uuid, IpNet)> = prefixes.into_iter().collect();
    ordered.sort_by_key(|(id, net)| (sort_key(net), *id));

    let mut out = Vec::with_capacity(ordered.len());
    let mut stack: Vec<Frame> = Vec::new();

    for (id, net) in ordered {
        loop {
            let step = match stack.last() {
                Some(top) if same_network(&top.net, &net) => Step::Merge,
                Some(top) if !contains(&top.net, &net) => Step::Pop,
                _ => Step::Push,
            };
            match step {
                Step::Pop => {
                    if let Some(frame) = stack.pop() {
                        emit(frame, &mut out);
                    }
                }
                Step::Merge => {
                    let top = stack.len() - 1;
                    for frame in &mut stack[..top] {
                        frame.children += 1;
                    }
                    stack[top].ids.push(id);
                    break;
                }
                Step::Push => {
                    for frame in &mut stack {
                        frame.children += 1;
                    }
                    let ancestors = stack
                        .last()
                        .map_or(0, |top| top.ancestors + top.ids.len() as u32);
                    stack.push(Frame {
                        ids: vec![id],
                        net,
                        ancestors,
                        children: 0,
                    });
                    break;
                }
            }
        }
    }

    while let Some(frame) = stack.pop() {
        emit(frame, &mut out);
    }
    out
}

fn emit(frame: Frame, out: &mut Vec<HierarchyEntry>) {
    for id in frame.ids {
        out.push(HierarchyEntry {
            id,
            depth: frame.ancestors,
            children: frame.children,
        });
    }
}
