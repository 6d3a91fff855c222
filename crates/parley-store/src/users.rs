//! Persistence of [`User`] records and contact lists.

use rusqlite::{params, Connection, OptionalExtension};
use tracing::{debug, info};

use parley_shared::{merge, Entity, MergePolicy, MergeResult, User};

use crate::codec::{decode_entity, decode_properties, encode_properties};
use crate::database::Database;
use crate::error::Result;

impl Database {
    // ------------------------------------------------------------------
    // Load / save
    // ------------------------------------------------------------------

    /// Insert the user, or overwrite the stored copy.
    pub fn save_user(&self, user: &User) -> Result<User> {
        upsert_user(self.conn(), user)?;
        Ok(user.clone())
    }

    pub fn load_user(&self, id: &Entity) -> Result<Option<User>> {
        query_user(self.conn(), id)
    }

    /// Contacts of `user`, ordered by display name.
    pub fn load_user_contacts(&self, user: &Entity) -> Result<Vec<User>> {
        query_user_contacts(self.conn(), user)
    }

    /// Contacts of `user` last seen online. This is the stored flag, not a
    /// live check.
    pub fn load_online_user_contacts(&self, user: &Entity) -> Result<Vec<User>> {
        Ok(query_user_contacts(self.conn(), user)?
            .into_iter()
            .filter(User::is_online)
            .collect())
    }

    /// Record the presence of `contact` and make sure it is listed as a
    /// contact of `user`. Returns the stored contact, or `None` if the
    /// stored copy already had that flag.
    pub fn update_contact_presence(
        &mut self,
        user: &Entity,
        contact: &User,
        online: bool,
    ) -> Result<Option<User>> {
        let tx = self.conn_mut().transaction()?;

        let stored = query_user(&tx, contact.id())?;
        let base = stored.clone().unwrap_or_else(|| contact.clone());
        let updated = base.with_online(online);

        let linked = tx.execute(
            "INSERT OR IGNORE INTO user_contacts (realm_id, user_id, contact_id)
             VALUES (?1, ?2, ?3)",
            params![user.realm_id(), user.entity_id(), contact.id().entity_id()],
        )? > 0;

        let changed = stored.is_none() || !User::ptr_eq(&updated, &base);
        if changed {
            upsert_user(&tx, &updated)?;
        }
        tx.commit()?;

        debug!(user = %user, contact = %contact.id(), online, changed, linked, "contact presence");
        Ok(changed.then_some(updated))
    }

    // ------------------------------------------------------------------
    // Merge
    // ------------------------------------------------------------------

    /// Reconcile the stored contact list of `user` with `contacts`.
    ///
    /// Removed contacts are unlinked from `user`; their user rows stay.
    pub fn merge_user_contacts(
        &mut self,
        user: &Entity,
        contacts: Vec<User>,
        policy: MergePolicy,
    ) -> Result<MergeResult<User, Entity>> {
        let tx = self.conn_mut().transaction()?;

        let local = query_user_contacts(&tx, user)?;
        let result = merge(contacts, local, |u: &User| u.id().clone(), policy);

        for contact in &result.added {
            upsert_user(&tx, contact)?;
            tx.execute(
                "INSERT OR IGNORE INTO user_contacts (realm_id, user_id, contact_id)
                 VALUES (?1, ?2, ?3)",
                params![user.realm_id(), user.entity_id(), contact.id().entity_id()],
            )?;
        }
        for contact in &result.updated {
            upsert_user(&tx, contact)?;
        }
        for contact_id in &result.removed {
            tx.execute(
                "DELETE FROM user_contacts WHERE user_id = ?1 AND contact_id = ?2",
                params![user.entity_id(), contact_id.entity_id()],
            )?;
        }

        tx.commit()?;

        info!(
            user = %user,
            added = result.added.len(),
            updated = result.updated.len(),
            removed = result.removed.len(),
            "merged user contacts"
        );
        Ok(result)
    }

    // ------------------------------------------------------------------
    // Delete
    // ------------------------------------------------------------------

    /// Delete every user of a realm along with all contact links.
    /// Returns the number of deleted users; 0 if the realm was already gone.
    pub fn remove_users_in_realm(&mut self, realm_id: &str) -> Result<usize> {
        let tx = self.conn_mut().transaction()?;
        tx.execute("DELETE FROM user_contacts WHERE realm_id = ?1", params![realm_id])?;
        let removed = tx.execute("DELETE FROM users WHERE realm_id = ?1", params![realm_id])?;
        tx.commit()?;

        info!(realm = realm_id, removed, "removed users in realm");
        Ok(removed)
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn upsert_user(conn: &Connection, user: &User) -> Result<()> {
    conn.execute(
        "INSERT INTO users (id, realm_id, display_name, online, properties)
         VALUES (?1, ?2, ?3, ?4, ?5)
         ON CONFLICT(id) DO UPDATE SET
             display_name = excluded.display_name,
             online       = excluded.online,
             properties   = excluded.properties",
        params![
            user.id().entity_id(),
            user.id().realm_id(),
            user.display_name(),
            user.is_online(),
            encode_properties(user.properties())?,
        ],
    )?;
    Ok(())
}

fn query_user(conn: &Connection, id: &Entity) -> Result<Option<User>> {
    Ok(conn
        .query_row(
            "SELECT id, display_name, online, properties FROM users WHERE id = ?1",
            params![id.entity_id()],
            row_to_user,
        )
        .optional()?)
}

fn query_user_contacts(conn: &Connection, user: &Entity) -> Result<Vec<User>> {
    let mut stmt = conn.prepare(
        "SELECT u.id, u.display_name, u.online, u.properties
         FROM users u
         JOIN user_contacts c ON c.contact_id = u.id
         WHERE c.user_id = ?1
         ORDER BY u.display_name ASC",
    )?;

    let rows = stmt.query_map(params![user.entity_id()], row_to_user)?;

    let mut users = Vec::new();
    for row in rows {
        users.push(row?);
    }
    Ok(users)
}

/// Map a `rusqlite::Row` to a [`User`].
fn row_to_user(row: &rusqlite::Row<'_>) -> rusqlite::Result<User> {
    let id_str: String = row.get(0)?;
    let display_name: String = row.get(1)?;
    let online: bool = row.get(2)?;
    let properties_str: String = row.get(3)?;

    let id = decode_entity(0, &id_str)?;
    let properties = decode_properties(3, &properties_str)?;

    Ok(User::new(id, display_name)
        .with_online(online)
        .with_properties(properties))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open() -> (tempfile::TempDir, Database) {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open_at(&dir.path().join("test.db")).unwrap();
        (dir, db)
    }

    fn user(id: &str, name: &str) -> User {
        User::new(Entity::new("xmpp", id), name)
    }

    fn names(users: &[User]) -> Vec<&str> {
        users.iter().map(|u| u.display_name()).collect()
    }

    #[test]
    fn test_save_and_load_user() {
        let (_dir, db) = open();
        let bob = user("bob", "Bob").with_online(true);
        db.save_user(&bob).unwrap();

        let loaded = db.load_user(bob.id()).unwrap().unwrap();
        assert_eq!(loaded, bob);
        assert!(db.load_user(&Entity::new("xmpp", "ghost")).unwrap().is_none());
    }

    #[test]
    fn test_merge_contacts_with_removal() {
        let (_dir, mut db) = open();
        let owner = Entity::new("xmpp", "me");

        db.merge_user_contacts(&owner, vec![user("a", "A"), user("c", "C")], MergePolicy::FULL)
            .unwrap();
        let result = db
            .merge_user_contacts(&owner, vec![user("a", "A"), user("b", "B")], MergePolicy::FULL)
            .unwrap();

        assert_eq!(names(&result.added), vec!["B"]);
        assert_eq!(result.removed, vec![Entity::new("xmpp", "c")]);
        assert_eq!(names(&result.unchanged), vec!["A"]);
        assert_eq!(names(&db.load_user_contacts(&owner).unwrap()), vec!["A", "B"]);

        // Unlinked, not deleted.
        assert!(db.load_user(&Entity::new("xmpp", "c")).unwrap().is_some());
    }

    #[test]
    fn test_merge_contacts_twice_is_noop() {
        let (_dir, mut db) = open();
        let owner = Entity::new("xmpp", "me");
        let remote = vec![user("a", "Alice"), user("b", "B")];

        db.merge_user_contacts(&owner, remote.clone(), MergePolicy::FULL).unwrap();
        let second = db.merge_user_contacts(&owner, remote, MergePolicy::FULL).unwrap();
        assert!(second.is_noop());
    }

    #[test]
    fn test_contact_presence_updates_online_list() {
        let (_dir, mut db) = open();
        let owner = Entity::new("xmpp", "me");
        db.merge_user_contacts(&owner, vec![user("a", "A"), user("b", "B")], MergePolicy::FULL)
            .unwrap();
        assert!(db.load_online_user_contacts(&owner).unwrap().is_empty());

        let online = db
            .update_contact_presence(&owner, &user("b", "B"), true)
            .unwrap()
            .unwrap();
        assert!(online.is_online());
        assert_eq!(names(&db.load_online_user_contacts(&owner).unwrap()), vec!["B"]);

        // Same flag again changes nothing.
        assert!(db
            .update_contact_presence(&owner, &user("b", "B"), true)
            .unwrap()
            .is_none());

        db.update_contact_presence(&owner, &user("b", "B"), false).unwrap();
        assert!(db.load_online_user_contacts(&owner).unwrap().is_empty());
    }

    #[test]
    fn test_presence_of_unknown_contact_links_it() {
        let (_dir, mut db) = open();
        let owner = Entity::new("xmpp", "me");

        let stored = db
            .update_contact_presence(&owner, &user("z", "Zed"), false)
            .unwrap()
            .unwrap();
        assert!(!stored.is_online());
        assert_eq!(names(&db.load_user_contacts(&owner).unwrap()), vec!["Zed"]);
    }

    #[test]
    fn test_remove_users_in_realm_is_idempotent() {
        let (_dir, mut db) = open();
        let owner = Entity::new("xmpp", "me");
        db.merge_user_contacts(&owner, vec![user("a", "A")], MergePolicy::FULL).unwrap();
        db.save_user(&User::new(Entity::new("vk", "1"), "Other realm")).unwrap();

        assert_eq!(db.remove_users_in_realm("xmpp").unwrap(), 1);
        assert_eq!(db.remove_users_in_realm("xmpp").unwrap(), 0);
        assert!(db.load_user_contacts(&owner).unwrap().is_empty());
        assert!(db.load_user(&Entity::new("vk", "1")).unwrap().is_some());
    }
}
