//! Term evaluation against tables.
//!
//! Matching a table produces, per field, the list of ways the field can be
//! satisfied. A wildcard term yields one candidate per matching id, and the
//! iterator visits every combination. Terms that only look at the table's
//! own type are "static" and can be cached; the others (fixed sources, up
//! traversal, type lists) are re-evaluated whenever the query is iterated.

use smallvec::{SmallVec, smallvec};

use super::{QueryPlan, Term, TermOper, TermSource, Traversal};
use crate::{
    World,
    id::{Entity, Id},
    table::{Table, TableId},
};

/// How one field is satisfied.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct FieldMatch {
    /// Concrete id that matched, or the term id if the field is not set.
    pub id: Id,
    /// Entity owning the data, `NULL` for `$this`.
    pub src: Entity,
    /// Table holding the data.
    pub table: Option<TableId>,
    pub column: Option<usize>,
    /// Row of `src` in `table`. Unused for `$this`.
    pub row: usize,
    pub set: bool,
}

impl FieldMatch {
    const fn unset(id: Id) -> Self {
        Self {
            id,
            src: Entity::NULL,
            table: None,
            column: None,
            row: 0,
            set: false,
        }
    }

    pub(crate) const fn is_self(&self) -> bool {
        self.src.is_null()
    }
}

pub(crate) type Candidates = SmallVec<[FieldMatch; 2]>;

/// Result of matching one table.
#[derive(Clone, Debug)]
pub(crate) struct TableMatch {
    /// `None` for queries without `$this` terms.
    pub table: Option<TableId>,
    /// Candidates for each field. Empty for fields not evaluated yet.
    pub fields: SmallVec<[Candidates; 8]>,
}

impl TableMatch {
    fn empty(table: Option<TableId>, field_count: usize) -> Self {
        Self {
            table,
            fields: smallvec![Candidates::new(); field_count],
        }
    }

    /// Number of field combinations.
    pub(crate) fn permutations(&self) -> usize {
        self.fields.iter().map(|c| c.len().max(1)).product()
    }

    /// Fields of combination `n`, in mixed-radix order with the last field
    /// varying fastest.
    pub(crate) fn permutation(&self, mut n: usize) -> SmallVec<[FieldMatch; 8]> {
        let mut out: SmallVec<[FieldMatch; 8]> = SmallVec::with_capacity(self.fields.len());
        for candidates in self.fields.iter().rev() {
            let len = candidates.len().max(1);
            let pick = candidates
                .get(n % len)
                .copied()
                .unwrap_or(FieldMatch::unset(Id::NULL));
            out.push(pick);
            n /= len;
        }
        out.reverse();
        out
    }
}

/// Match every term of `plan` against `table`.
pub(crate) fn match_table(
    world: &World,
    plan: &QueryPlan,
    table: Option<&Table>,
) -> Option<TableMatch> {
    let m = match_static(world, plan, table)?;
    match_dynamic(world, plan, table, m)
}

/// Match the terms that only depend on the table's own type.
pub(crate) fn match_static(
    world: &World,
    plan: &QueryPlan,
    table: Option<&Table>,
) -> Option<TableMatch> {
    let mut m = TableMatch::empty(table.map(Table::id), plan.field_count);
    match_fields(world, plan, table, &mut m, true).then_some(m)
}

/// Complete a static match with the remaining terms.
pub(crate) fn match_dynamic(
    world: &World,
    plan: &QueryPlan,
    table: Option<&Table>,
    mut m: TableMatch,
) -> Option<TableMatch> {
    if !plan.has_dynamic {
        return Some(m);
    }
    match_fields(world, plan, table, &mut m, false).then_some(m)
}

fn match_fields(
    world: &World,
    plan: &QueryPlan,
    table: Option<&Table>,
    m: &mut TableMatch,
    static_pass: bool,
) -> bool {
    let mut index = 0;
    while index < plan.terms.len() {
        let term = &plan.terms[index];
        let field = plan.fields[index];

        if term.oper == TermOper::Or {
            let end = or_chain_end(plan, index);
            if static_pass {
                let Some(found) = plan.terms[index..end]
                    .iter()
                    .map(|t| term_candidates(world, t, table))
                    .find(|c| !c.is_empty())
                else {
                    return false;
                };
                m.fields[field] = found;
            }
            index = end;
            continue;
        }

        if term.is_static() == static_pass {
            let Some(result) = eval_term(world, term, table) else {
                return false;
            };
            m.fields[field] = result;
        }
        index += 1;
    }
    true
}

fn or_chain_end(plan: &QueryPlan, start: usize) -> usize {
    let field = plan.fields[start];
    plan.fields[start..]
        .iter()
        .position(|&f| f != field)
        .map_or(plan.terms.len(), |offset| start + offset)
}

/// Evaluate a non-`Or` term. `None` means the term rejects the table.
fn eval_term(world: &World, term: &Term, table: Option<&Table>) -> Option<Candidates> {
    if term.oper.is_type_list() {
        return eval_type_list(world, term, table);
    }
    let found = term_candidates(world, term, table);
    match term.oper {
        TermOper::And => (!found.is_empty()).then_some(found),
        TermOper::Not => found.is_empty().then(|| smallvec![FieldMatch::unset(term.id)]),
        TermOper::Optional if found.is_empty() => Some(smallvec![FieldMatch::unset(term.id)]),
        _ => Some(found),
    }
}

/// `AndFrom`, `OrFrom` and `NotFrom` compare the table against the type of
/// the term's entity.
fn eval_type_list(world: &World, term: &Term, table: Option<&Table>) -> Option<Candidates> {
    let table = table?;
    let list = term
        .id
        .entity()
        .and_then(|e| world.table_of(e))
        .and_then(|t| world.table(t))
        .map_or(&[][..], Table::ids);
    let ok = match term.oper {
        TermOper::AndFrom => list.iter().all(|&id| table.has(id)),
        TermOper::OrFrom => list.iter().any(|&id| table.has(id)),
        _ => !list.iter().any(|&id| table.has(id)),
    };
    ok.then(|| smallvec![FieldMatch::unset(term.id)])
}

/// Every way `term.id` is present on the term's source, ignoring the
/// operator.
fn term_candidates(world: &World, term: &Term, this: Option<&Table>) -> Candidates {
    let mut out = Candidates::new();

    let (src, table, row) = match term.src {
        TermSource::This => (Entity::NULL, this, 0),
        TermSource::Entity(entity) => match world.record(entity) {
            Some(record) => (entity, world.table(record.table), record.row),
            // A dead source has an empty type
            None => return out,
        },
    };
    let Some(table) = table else {
        return out;
    };

    if term.trav.contains(Traversal::SELF) {
        let mut start = 0;
        while let Some(index) = table.search(term.id, start) {
            out.push(FieldMatch {
                id: table.ids()[index],
                src,
                table: Some(table.id()),
                column: table.column_of(index).filter(|_| term.has_data()),
                row,
                set: true,
            });
            if term.id.is_any() {
                break;
            }
            start = index + 1;
        }
    }

    if out.is_empty() && term.trav.contains(Traversal::UP) {
        if let Some(up) = world.find_up(table, term.id, term.trav_rel) {
            out.push(FieldMatch {
                id: up.id,
                src: up.src,
                table: Some(up.table),
                column: up.column.filter(|_| term.has_data()),
                row: up.row,
                set: true,
            });
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::id::pair;

    fn fm(id: u32) -> FieldMatch {
        FieldMatch {
            set: true,
            ..FieldMatch::unset(Entity::from_index(id).id())
        }
    }

    #[test]
    fn test_permutations_cover_all_combinations() {
        let m = TableMatch {
            table: None,
            fields: smallvec![
                smallvec![fm(40), fm(41)],
                Candidates::new(),
                smallvec![fm(50), fm(51), fm(52)],
            ],
        };
        assert_eq!(m.permutations(), 6);
        let combos: Vec<(u32, u32)> = (0..6)
            .map(|n| {
                let p = m.permutation(n);
                assert!(!p[1].set);
                (p[0].id.raw() as u32, p[2].id.raw() as u32)
            })
            .collect();
        assert_eq!(combos[0], (40, 50));
        assert_eq!(combos[2], (40, 52));
        assert_eq!(combos[3], (41, 50));
        assert_eq!(combos[5], (41, 52));
    }

    #[test]
    fn test_unset_field_keeps_term_id() {
        let id = pair(Entity::from_index(40), Entity::from_index(41));
        let unset = FieldMatch::unset(id);
        assert_eq!(unset.id, id);
        assert!(unset.is_self());
        assert!(!unset.set);
    }
}
