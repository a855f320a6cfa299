use sqlx::{Postgres, QueryBuilder};
use time::OffsetDateTime;
use vitrine_common::model::edit::ProductChange;

/// Builds the single compound update that rewrites title, link and image
/// of every changed product, keyed per row by a CASE over the product id.
///
/// Must not be called with an empty change set; callers check the length
/// before building the statement.
pub(crate) fn changed_products_update(
    changes: &[ProductChange],
    updated_at: OffsetDateTime,
) -> QueryBuilder<'static, Postgres> {
    debug_assert!(!changes.is_empty());

    let mut builder = QueryBuilder::new("UPDATE products SET ");

    push_case(&mut builder, "title", changes, |change| &change.title);
    builder.push(", ");
    push_case(&mut builder, "link", changes, |change| &change.link);
    builder.push(", image = CASE id");
    for change in changes {
        builder
            .push(" WHEN ")
            .push_bind(change.id.get())
            .push(" THEN ")
            .push_bind(change.image.clone());
    }
    builder.push(" END");

    builder.push(", updated_at = ").push_bind(updated_at);

    builder.push(" WHERE id IN (");
    let mut separated = builder.separated(", ");
    for change in changes {
        separated.push_bind(change.id.get());
    }
    builder.push(")");

    builder
}

fn push_case(
    builder: &mut QueryBuilder<'static, Postgres>,
    column: &str,
    changes: &[ProductChange],
    value: impl Fn(&ProductChange) -> &String,
) {
    builder.push(column).push(" = CASE id");
    for change in changes {
        builder
            .push(" WHEN ")
            .push_bind(change.id.get())
            .push(" THEN ")
            .push_bind(value(change).clone());
    }
    builder.push(" END");
}
